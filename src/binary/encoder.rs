use crate::binary::node::{Attrs, Node, NodeContent};
use crate::binary::token;
use crate::types::jid;

/// Pre-parsed JID pieces destined for the structural JID encodings.
struct JidParts<'a> {
    /// User with any agent suffix stripped, for the addressable-device form.
    user: &'a str,
    /// User as written (agent suffix intact), for the plain pair form.
    bare_user: &'a str,
    server: &'a str,
    domain_type: u8,
    device: Option<u16>,
}

fn split_jid(input: &str) -> Option<JidParts<'_>> {
    let (user_part, server) = input.split_once('@')?;
    if user_part.is_empty() {
        return None;
    }

    let (user_agent, device) = match user_part.rsplit_once(':') {
        Some((u, d)) => (u, Some(d.parse::<u16>().ok()?)),
        None => (user_part, None),
    };

    let (user, agent) = if server == jid::HIDDEN_USER_SERVER {
        (user_agent, 0u8)
    } else {
        match user_agent.rsplit_once('.') {
            Some((u, a)) => match a.parse::<u8>() {
                Ok(agent) => (u, agent),
                Err(_) => (user_agent, 0),
            },
            None => (user_agent, 0),
        }
    };

    let domain_type = match server {
        jid::DEFAULT_USER_SERVER => 0,
        jid::HIDDEN_USER_SERVER => 1,
        jid::HOSTED_SERVER => agent.max(2),
        _ => agent,
    };

    Some(JidParts {
        user,
        bare_user: user_agent,
        server,
        domain_type,
        device,
    })
}

pub(crate) struct Encoder {
    out: Vec<u8>,
}

impl Encoder {
    /// Starts an encode stream. The leading byte is the frame flag byte
    /// (zero: uncompressed body).
    pub(crate) fn new() -> Self {
        Self { out: vec![0] }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.out
    }

    fn push(&mut self, b: u8) {
        self.out.push(b);
    }

    fn push_u16_be(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn push_u20_be(&mut self, v: u32) {
        self.push(((v >> 16) & 0x0F) as u8);
        self.push(((v >> 8) & 0xFF) as u8);
        self.push((v & 0xFF) as u8);
    }

    fn push_u32_be(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        if len < 256 {
            self.push(token::BINARY_8);
            self.push(len as u8);
        } else if len < (1 << 20) {
            self.push(token::BINARY_20);
            self.push_u20_be(len as u32);
        } else {
            self.push(token::BINARY_32);
            self.push_u32_be(len as u32);
        }
        self.out.extend_from_slice(bytes);
    }

    fn write_string(&mut self, s: &str) {
        if s.is_empty() {
            self.push(token::LIST_EMPTY);
        } else if let Some(index) = token::index_of_single_token(s) {
            self.push(index);
        } else if let Some((page, index)) = token::index_of_double_token(s) {
            self.push(token::DICTIONARY_0 + page);
            self.push(index);
        } else if is_nibble_packable(s) {
            self.write_packed(s, token::NIBBLE_8);
        } else if is_hex_packable(s) {
            self.write_packed(s, token::HEX_8);
        } else if let Some(parts) = split_jid(s) {
            self.write_jid(s, &parts);
        } else {
            self.write_bytes(s.as_bytes());
        }
    }

    fn write_jid(&mut self, raw: &str, parts: &JidParts<'_>) {
        match parts.device {
            // The addressable-device form only has one byte for the device.
            Some(device) if device <= u8::MAX as u16 => {
                self.push(token::AD_JID);
                self.push(parts.domain_type);
                self.push(device as u8);
                self.write_string(parts.user);
            }
            // Oversized devices cannot be represented structurally.
            Some(_) => self.write_bytes(raw.as_bytes()),
            None => {
                self.push(token::JID_PAIR);
                self.write_string(parts.bare_user);
                self.write_string(parts.server);
            }
        }
    }

    fn write_packed(&mut self, value: &str, data_type: u8) {
        debug_assert!(value.len() <= token::PACKED_MAX);
        self.push(data_type);

        let mut header = value.len().div_ceil(2) as u8;
        if value.len() % 2 != 0 {
            header |= 0x80;
        }
        self.push(header);

        let pack: fn(u8) -> u8 = if data_type == token::NIBBLE_8 {
            pack_nibble
        } else {
            pack_hex
        };

        let bytes = value.as_bytes();
        for pair in bytes.chunks(2) {
            let hi = pack(pair[0]);
            let lo = if pair.len() == 2 { pack(pair[1]) } else { 0x0F };
            self.push((hi << 4) | lo);
        }
    }

    fn write_list_start(&mut self, len: usize) {
        if len == 0 {
            self.push(token::LIST_EMPTY);
        } else if len < 256 {
            self.push(token::LIST_8);
            self.push(len as u8);
        } else {
            self.push(token::LIST_16);
            self.push_u16_be(len as u16);
        }
    }

    fn write_attrs(&mut self, attrs: &Attrs) {
        for (key, value) in attrs {
            self.write_string(key);
            self.write_string(value);
        }
    }

    fn write_content(&mut self, content: &NodeContent) {
        match content {
            NodeContent::String(s) => self.write_string(s),
            NodeContent::Bytes(b) => self.write_bytes(b),
            NodeContent::Nodes(nodes) => {
                self.write_list_start(nodes.len());
                for node in nodes {
                    self.write_node(node);
                }
            }
        }
    }

    pub(crate) fn write_node(&mut self, node: &Node) {
        let content_len = usize::from(node.content.is_some());
        self.write_list_start(1 + node.attrs.len() * 2 + content_len);
        self.write_string(&node.tag);
        self.write_attrs(&node.attrs);
        if let Some(content) = &node.content {
            self.write_content(content);
        }
    }
}

fn is_nibble_packable(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= token::PACKED_MAX
        && s.bytes().all(|b| b.is_ascii_digit() || b == b'-' || b == b'.')
}

fn pack_nibble(b: u8) -> u8 {
    match b {
        b'-' => 10,
        b'.' => 11,
        _ => b - b'0',
    }
}

fn is_hex_packable(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= token::PACKED_MAX
        && s.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

fn pack_hex(b: u8) -> u8 {
    if b.is_ascii_digit() {
        b - b'0'
    } else {
        10 + (b - b'A')
    }
}
