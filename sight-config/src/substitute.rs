//! `${name}` parameter substitution over a [`ConfigNode`] tree.
//!
//! Token grammar: `${name}` is required — an unresolved one is
//! `configuration_invalid`. `${name:-default}` is optional: if `name` is
//! absent from the parameter map the literal `default` is substituted
//! instead, so "this attribute is allowed to be unresolved" is expressed in
//! the token itself rather than by an out-of-band per-attribute flag.

use std::collections::HashMap;

use sight_core::{ConfigNode, RuntimeError};

pub type Parameters = HashMap<String, String>;

/// Deep-copies `node`, substituting every `${...}` token in every attribute
/// value.
pub fn substitute(node: &ConfigNode, params: &Parameters) -> Result<ConfigNode, RuntimeError> {
    let mut out = ConfigNode::new(node.tag.clone());
    out.text = node.text.clone();
    for (key, value) in &node.attributes {
        out.attributes.insert(key.clone(), substitute_value(value, params)?);
    }
    for child in &node.children {
        out.children.push(substitute(child, params)?);
    }
    Ok(out)
}

fn substitute_value(value: &str, params: &Parameters) -> Result<String, RuntimeError> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            RuntimeError::ConfigurationInvalid(format!("unterminated `${{` in `{value}`"))
        })?;
        let token = &after[..end];
        out.push_str(&resolve_token(token, value, params)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_token(token: &str, whole_value: &str, params: &Parameters) -> Result<String, RuntimeError> {
    match token.split_once(":-") {
        Some((name, default)) => Ok(params.get(name).cloned().unwrap_or_else(|| default.to_owned())),
        None => params.get(token).cloned().ok_or_else(|| {
            RuntimeError::ConfigurationInvalid(format!(
                "unresolved parameter `${{{token}}}` in `{whole_value}`"
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_required_and_optional_tokens() {
        let mut node = ConfigNode::new("object");
        node.attributes.insert("uid".into(), "${uid}".into());
        node.attributes.insert("value".into(), "${value:-0}".into());
        let mut params = Parameters::new();
        params.insert("uid".into(), "a".into());

        let out = substitute(&node, &params).unwrap();
        assert_eq!(out.attr("uid"), Some("a"));
        assert_eq!(out.attr("value"), Some("0"));
    }

    #[test]
    fn unresolved_required_reference_is_configuration_invalid() {
        let mut node = ConfigNode::new("object");
        node.attributes.insert("uid".into(), "${missing}".into());
        assert!(substitute(&node, &Parameters::new()).is_err());
    }

    #[test]
    fn recurses_into_children() {
        let mut child = ConfigNode::new("in");
        child.attributes.insert("uid".into(), "${uid}".into());
        let mut node = ConfigNode::new("service");
        node.children.push(child);
        let mut params = Parameters::new();
        params.insert("uid".into(), "a".into());

        let out = substitute(&node, &params).unwrap();
        assert_eq!(out.children[0].attr("uid"), Some("a"));
    }
}
