//! The compact tagged binary node format spoken on the encrypted stream.

pub mod attrs;
pub mod builder;
mod decoder;
mod encoder;
pub mod error;
pub mod node;
pub mod token;
pub mod util;

pub use builder::NodeBuilder;
pub use error::{BinaryError, Result};
pub use node::{Attrs, Node, NodeContent};

use decoder::Decoder;
use encoder::Encoder;

/// Serializes a node, including the leading frame flag byte.
pub fn marshal(node: &Node) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.write_node(node);
    enc.finish()
}

/// Decodes a node from an unpacked frame body (flag byte already removed,
/// see [`util::unpack`]).
pub fn unmarshal(data: &[u8]) -> Result<Node> {
    let mut dec = Decoder::new(data);
    let node = dec.read_node()?;
    if dec.is_finished() {
        Ok(node)
    } else {
        Err(BinaryError::LeftoverData(dec.bytes_left()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(node: Node) {
        let payload = marshal(&node);
        let body = util::unpack(&payload).unwrap();
        let decoded = unmarshal(&body).unwrap();
        assert_eq!(decoded, node, "roundtrip mismatch for {node}");
    }

    #[test]
    fn roundtrip_iq_with_children() {
        roundtrip(
            NodeBuilder::new("iq")
                .attr("id", "171.42-7")
                .attr("xmlns", "w:sync:app:state")
                .attr("type", "set")
                .attr("to", "s.whatsapp.net")
                .children([NodeBuilder::new("sync")
                    .children([NodeBuilder::new("collection")
                        .attr("name", "regular_high")
                        .attr("version", "17")
                        .attr("return_snapshot", "false")
                        .build()])
                    .build()])
                .build(),
        );
    }

    #[test]
    fn roundtrip_jid_attributes() {
        roundtrip(
            NodeBuilder::new("receipt")
                .attr("from", "1234567890@s.whatsapp.net")
                .attr("participant", "1234567890:12@s.whatsapp.net")
                .attr("recipient", "123-456@g.us")
                .build(),
        );
        roundtrip(
            NodeBuilder::new("message")
                .attr("from", "98765.4321:3@lid")
                .build(),
        );
    }

    #[test]
    fn roundtrip_blob_content() {
        roundtrip(NodeBuilder::new("enc").bytes(vec![7u8; 300]).build());
        roundtrip(NodeBuilder::new("enc").bytes(Vec::new()).build());
    }

    #[test]
    fn roundtrip_packed_and_raw_strings() {
        roundtrip(
            NodeBuilder::new("item")
                .attr("serial", "0123456789")
                .attr("hash", "0AF3")
                .attr("name", "not a packable value")
                .attr("empty", "")
                .build(),
        );
    }

    #[test]
    fn roundtrip_large_child_list() {
        let children: Vec<Node> = (0..300)
            .map(|i| NodeBuilder::new("item").attr("id", i.to_string()).build())
            .collect();
        roundtrip(NodeBuilder::new("list").children(children).build());
    }

    #[test]
    fn unknown_token_is_a_codec_error() {
        // 240 is an unassigned tag byte.
        let bad = [248u8, 2, 240, 0];
        assert!(matches!(
            unmarshal(&bad),
            Err(BinaryError::InvalidToken(240))
        ));
    }

    #[test]
    fn leftover_bytes_are_rejected() {
        let mut payload = marshal(&NodeBuilder::new("ping").build());
        payload.push(0x00);
        let body = util::unpack(&payload).unwrap();
        assert!(matches!(
            unmarshal(&body),
            Err(BinaryError::LeftoverData(1))
        ));
    }
}
