use crate::binary::error::{BinaryError, Result};
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::binary::token;
use crate::types::jid::{self, Jid};

pub(crate) struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn bytes_left(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or(BinaryError::Eof)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.bytes_left() < len {
            return Err(BinaryError::Eof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u16_be(&mut self) -> Result<usize> {
        let b = self.read_bytes(2)?;
        Ok(((b[0] as usize) << 8) | b[1] as usize)
    }

    fn read_u20_be(&mut self) -> Result<usize> {
        let b = self.read_bytes(3)?;
        Ok(((b[0] as usize & 0x0F) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn read_u32_be(&mut self) -> Result<usize> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BinaryError::InvalidUtf8)
    }

    fn read_list_size(&mut self, tag: u8) -> Result<usize> {
        match tag {
            token::LIST_EMPTY => Ok(0),
            token::LIST_8 => Ok(self.read_u8()? as usize),
            token::LIST_16 => self.read_u16_be(),
            _ => Err(BinaryError::InvalidToken(tag)),
        }
    }

    /// Reads one value from the stream as a string. `None` stands for the
    /// empty-value marker.
    fn read_value(&mut self) -> Result<Option<String>> {
        let tag = self.read_u8()?;
        match tag {
            token::LIST_EMPTY => Ok(None),
            token::BINARY_8 => {
                let len = self.read_u8()? as usize;
                self.read_string(len).map(Some)
            }
            token::BINARY_20 => {
                let len = self.read_u20_be()?;
                self.read_string(len).map(Some)
            }
            token::BINARY_32 => {
                let len = self.read_u32_be()?;
                self.read_string(len).map(Some)
            }
            token::JID_PAIR => self.read_jid_pair().map(|j| Some(j.to_string())),
            token::AD_JID => self.read_ad_jid().map(|j| Some(j.to_string())),
            token::NIBBLE_8 | token::HEX_8 => self.read_packed(tag).map(Some),
            token::DICTIONARY_0..=token::DICTIONARY_3 => {
                let index = self.read_u8()?;
                token::get_double_token(tag - token::DICTIONARY_0, index)
                    .map(|s| Some(s.to_string()))
                    .ok_or(BinaryError::InvalidToken(index))
            }
            _ => token::get_single_token(tag)
                .map(|s| Some(s.to_string()))
                .ok_or(BinaryError::InvalidToken(tag)),
        }
    }

    fn read_jid_pair(&mut self) -> Result<Jid> {
        let user = self.read_value()?.unwrap_or_default();
        let server = self.read_value()?.ok_or(BinaryError::InvalidNode)?;
        Ok(Jid::new(user, server))
    }

    fn read_ad_jid(&mut self) -> Result<Jid> {
        let agent = self.read_u8()?;
        let device = self.read_u8()? as u16;
        let user = self.read_value()?.ok_or(BinaryError::InvalidNode)?;
        let server = match agent {
            0 => jid::DEFAULT_USER_SERVER,
            1 => jid::HIDDEN_USER_SERVER,
            _ => jid::HOSTED_SERVER,
        };
        Ok(Jid {
            user,
            server: server.to_string(),
            agent,
            device,
        })
    }

    fn read_packed(&mut self, tag: u8) -> Result<String> {
        let header = self.read_u8()?;
        let half_byte = header & 0x80 != 0;
        let byte_len = (header & 0x7F) as usize;

        let mut out = String::with_capacity(byte_len * 2);
        let packed = self.read_bytes(byte_len)?;
        for &b in packed {
            out.push(Self::unpack_nibble(tag, b >> 4)?);
            out.push(Self::unpack_nibble(tag, b & 0x0F)?);
        }
        if half_byte {
            out.pop();
        }
        Ok(out)
    }

    fn unpack_nibble(tag: u8, value: u8) -> Result<char> {
        match tag {
            token::NIBBLE_8 => match value {
                0..=9 => Ok((b'0' + value) as char),
                10 => Ok('-'),
                11 => Ok('.'),
                15 => Ok('\x00'),
                _ => Err(BinaryError::InvalidPacked(value)),
            },
            token::HEX_8 => match value {
                0..=9 => Ok((b'0' + value) as char),
                10..=15 => Ok((b'A' + value - 10) as char),
                _ => Err(BinaryError::InvalidPacked(value)),
            },
            _ => Err(BinaryError::InvalidToken(tag)),
        }
    }

    fn read_attrs(&mut self, count: usize) -> Result<Attrs> {
        let mut attrs = Attrs::with_capacity(count);
        for _ in 0..count {
            let key = self.read_value()?.ok_or(BinaryError::NonStringKey)?;
            let value = self.read_value()?.unwrap_or_default();
            attrs.insert(key, value);
        }
        Ok(attrs)
    }

    fn read_content(&mut self) -> Result<Option<NodeContent>> {
        let tag = self.read_u8()?;
        match tag {
            token::LIST_EMPTY => Ok(None),
            token::BINARY_8 => {
                let len = self.read_u8()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::BINARY_20 => {
                let len = self.read_u20_be()?;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::BINARY_32 => {
                let len = self.read_u32_be()?;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            _ => {
                let size = self.read_list_size(tag)?;
                let mut nodes = Vec::with_capacity(size);
                for _ in 0..size {
                    nodes.push(self.read_node()?);
                }
                Ok(Some(NodeContent::Nodes(nodes)))
            }
        }
    }

    pub(crate) fn read_node(&mut self) -> Result<Node> {
        let tag = self.read_u8()?;
        let list_size = self.read_list_size(tag)?;
        if list_size == 0 {
            return Err(BinaryError::InvalidNode);
        }

        let tag = self.read_value()?.ok_or(BinaryError::InvalidNode)?;
        let attr_count = (list_size - 1) / 2;
        let has_content = list_size % 2 == 0;

        let attrs = self.read_attrs(attr_count)?;
        let content = if has_content {
            self.read_content()?
        } else {
            None
        };

        Ok(Node { tag, attrs, content })
    }
}
