use crate::binary::attrs::AttrParser;
use indexmap::IndexMap;
use std::fmt;

/// Attribute map. Insertion order is preserved so an encode/decode cycle
/// reproduces the original byte sequence.
pub type Attrs = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Bytes(Vec<u8>),
    String(String),
    Nodes(Vec<Node>),
}

/// The universal message unit: a tag, an ordered attribute map and optional
/// content. Nodes are plain data; [`crate::binary::NodeBuilder`] is the
/// ergonomic way to construct them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: Option<NodeContent>,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Typed attribute accessor with recoverable error accumulation.
    pub fn attr_parser(&self) -> AttrParser<'_> {
        AttrParser::new(self)
    }

    pub fn children(&self) -> &[Node] {
        match &self.content {
            Some(NodeContent::Nodes(nodes)) => nodes,
            _ => &[],
        }
    }

    pub fn get_optional_child(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|c| c.tag == tag)
    }

    pub fn get_children_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children().iter().filter(move |c| c.tag == tag)
    }

    /// Walks a path of tags, returning the innermost node if every step exists.
    pub fn get_child_by_path(&self, path: &[&str]) -> Option<&Node> {
        let mut current = self;
        for tag in path {
            current = current.get_optional_child(tag)?;
        }
        Some(current)
    }

    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Some(NodeContent::Bytes(b)) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    /// XML-ish rendering for logs only; not a wire format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (k, v) in &self.attrs {
            write!(f, " {k}={v:?}")?;
        }
        match &self.content {
            None => write!(f, "/>"),
            Some(NodeContent::Bytes(b)) => write!(f, ">[{} bytes]</{}>", b.len(), self.tag),
            Some(NodeContent::String(s)) => write!(f, ">{}</{}>", s, self.tag),
            Some(NodeContent::Nodes(nodes)) => {
                write!(f, ">")?;
                for child in nodes {
                    write!(f, "{child}")?;
                }
                write!(f, "</{}>", self.tag)
            }
        }
    }
}
