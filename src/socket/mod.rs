pub mod consts;
pub mod error;
mod frame_socket;
mod noise_socket;

pub use error::{Result, SocketError};
pub use frame_socket::{encode_frame, FrameBuffer, FrameSocket};
pub use noise_socket::{generate_iv, NoiseCipher, NoiseSocket};
