pub mod events;
pub mod jid;
