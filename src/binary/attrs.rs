use crate::binary::error::{BinaryError, Result};
use crate::binary::node::Node;
use crate::types::jid::Jid;
use std::str::FromStr;

/// Typed attribute accessor.
///
/// Wrong or missing values are recoverable: they accumulate into an error
/// list instead of failing the first access, so a handler can read every
/// attribute it cares about and check [`AttrParser::finish`] once.
pub struct AttrParser<'a> {
    node: &'a Node,
    pub errors: Vec<BinaryError>,
}

impl<'a> AttrParser<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self {
            node,
            errors: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&self) -> Result<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(BinaryError::AttrList(self.errors.clone()))
        }
    }

    fn get(&mut self, key: &str, required: bool) -> Option<&'a str> {
        let value = self.node.attrs.get(key).map(String::as_str);
        if required && value.is_none() {
            self.errors.push(BinaryError::MissingAttr(key.to_string()));
        }
        value
    }

    pub fn optional_string(&mut self, key: &str) -> Option<&'a str> {
        self.get(key, false)
    }

    pub fn string(&mut self, key: &str) -> String {
        self.get(key, true).unwrap_or_default().to_string()
    }

    pub fn optional_jid(&mut self, key: &str) -> Option<Jid> {
        let raw = self.get(key, false)?;
        match Jid::from_str(raw) {
            Ok(jid) => Some(jid),
            Err(e) => {
                self.errors
                    .push(BinaryError::AttrParse(format!("invalid JID '{raw}': {e}")));
                None
            }
        }
    }

    pub fn jid(&mut self, key: &str) -> Jid {
        self.get(key, true);
        self.optional_jid(key).unwrap_or_default()
    }

    pub fn optional_u64(&mut self, key: &str) -> Option<u64> {
        let raw = self.get(key, false)?;
        match raw.parse::<u64>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "bad u64 '{raw}' for '{key}': {e}"
                )));
                None
            }
        }
    }

    pub fn u64(&mut self, key: &str) -> u64 {
        self.get(key, true);
        self.optional_u64(key).unwrap_or_default()
    }

    pub fn optional_bool(&mut self, key: &str) -> bool {
        let Some(raw) = self.get(key, false) else {
            return false;
        };
        match raw.parse::<bool>() {
            Ok(v) => v,
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "bad bool '{raw}' for '{key}': {e}"
                )));
                false
            }
        }
    }

    pub fn optional_unix_time(&mut self, key: &str) -> Option<i64> {
        let raw = self.get(key, false)?;
        match raw.parse::<i64>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(BinaryError::AttrParse(format!(
                    "bad timestamp '{raw}' for '{key}': {e}"
                )));
                None
            }
        }
    }

    pub fn unix_time(&mut self, key: &str) -> i64 {
        self.get(key, true);
        self.optional_unix_time(key).unwrap_or_default()
    }
}
