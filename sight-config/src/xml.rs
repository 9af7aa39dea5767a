//! Parses application-configuration XML into the immutable [`ConfigNode`]
//! tree `sight-core` defines. This is the only crate in the workspace that
//! knows XML exists; everything downstream (substitution, the engine,
//! activities) works against the generic tree.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use sight_core::{ConfigNode, RuntimeError};

struct Frame {
    node: ConfigNode,
    text: String,
}

/// Parses a single root element. A document with no root element, or more
/// than one top-level element, is `configuration_invalid`.
pub fn parse(xml: &str) -> Result<ConfigNode, RuntimeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<ConfigNode> = None;

    loop {
        match reader.read_event().map_err(|e| invalid(&e))? {
            Event::Start(e) => {
                let mut node = ConfigNode::new(tag_name(&e)?);
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| invalid(&e))?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .map_err(|e| invalid(&e))?
                        .into_owned();
                    node.attributes.insert(key, value);
                }
                stack.push(Frame { node, text: String::new() });
            }
            Event::Empty(e) => {
                let mut node = ConfigNode::new(tag_name(&e)?);
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| invalid(&e))?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .map_err(|e| invalid(&e))?
                        .into_owned();
                    node.attributes.insert(key, value);
                }
                push_finished(&mut stack, &mut root, node)?;
            }
            Event::Text(e) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&e.unescape().map_err(|e| invalid(&e))?);
                }
            }
            Event::End(_) => {
                let mut frame = stack.pop().ok_or_else(|| {
                    RuntimeError::ConfigurationInvalid("unbalanced closing tag".into())
                })?;
                if !frame.text.trim().is_empty() {
                    frame.node.text = Some(frame.text.trim().to_owned());
                }
                push_finished(&mut stack, &mut root, frame.node)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| RuntimeError::ConfigurationInvalid("empty configuration document".into()))
}

fn push_finished(
    stack: &mut Vec<Frame>,
    root: &mut Option<ConfigNode>,
    node: ConfigNode,
) -> Result<(), RuntimeError> {
    match stack.last_mut() {
        Some(parent) => parent.node.children.push(node),
        None => {
            if root.is_some() {
                return Err(RuntimeError::ConfigurationInvalid(
                    "more than one top-level element".into(),
                ));
            }
            *root = Some(node);
        }
    }
    Ok(())
}

fn tag_name(e: &quick_xml::events::BytesStart<'_>) -> Result<String, RuntimeError> {
    Ok(String::from_utf8_lossy(e.name().as_ref()).into_owned())
}

fn invalid(e: &impl std::fmt::Display) -> RuntimeError {
    RuntimeError::ConfigurationInvalid(format!("xml parse error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_attributes_and_text() {
        let xml = r#"
            <config id="main">
                <object uid="a" type="int"/>
                <service uid="adder" type="Adder">
                    <in key="a" uid="a"/>
                </service>
            </config>
        "#;
        let root = parse(xml).unwrap();
        assert_eq!(root.tag, "config");
        assert_eq!(root.attr("id"), Some("main"));
        assert_eq!(root.children.len(), 2);
        let service = root.child_named("service").unwrap();
        assert_eq!(service.attr("type"), Some("Adder"));
        assert_eq!(service.children_named("in").count(), 1);
    }

    #[test]
    fn rejects_document_with_no_root() {
        assert!(parse("   ").is_err());
    }

    #[test]
    fn rejects_multiple_top_level_elements() {
        assert!(parse("<a/><b/>").is_err());
    }
}
