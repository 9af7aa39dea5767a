//! The generic configuration tree: `(tag, attributes, children, text)`.
//! Lives in `sight-core` (rather than the XML-parsing `sight-config` crate)
//! because [`crate::service::ServiceHooks::configure`] needs to accept it
//! without `sight-core` depending back on the parser crate.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigNode {
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub children: Vec<ConfigNode>,
    pub text: Option<String>,
}

impl ConfigNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: HashMap::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attr_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.attr(name).unwrap_or(default)
    }

    pub fn attr_bool(&self, name: &str, default: bool) -> bool {
        match self.attr(name) {
            Some("true") | Some("yes") | Some("1") => true,
            Some("false") | Some("no") | Some("0") => false,
            _ => default,
        }
    }

    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a ConfigNode> {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    pub fn child_named(&self, tag: &str) -> Option<&ConfigNode> {
        self.children.iter().find(|c| c.tag == tag)
    }
}
