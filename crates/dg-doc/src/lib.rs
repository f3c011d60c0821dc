//! Document tree interchange model for dg.
//!
//! The host processing system parses documents into this tree, hands it to
//! the diagram pipeline, and serializes the mutated tree back out. The model
//! is deliberately minimal: it carries exactly the node shapes the pipeline
//! reads (code blocks with attributes) and writes (figures with artifact
//! references), plus an opaque container for everything else.
//!
//! The tree round-trips through JSON via serde, which is the interchange
//! format with the host.

use serde::{Deserialize, Serialize};

/// Node attributes: identifier, class list, and ordered key/value pairs.
///
/// The order of `pairs` is preserved from the source document — later keys
/// do not shadow earlier ones at this layer; consumers decide precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attr {
    /// Element identifier (may be empty).
    pub id: String,
    /// Class names, e.g. the diagram language tag.
    pub classes: Vec<String>,
    /// Key/value attributes in document order.
    pub pairs: Vec<(String, String)>,
}

impl Attr {
    /// Look up the first value declared for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the class list contains `class`.
    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

/// A fenced code block with its attributes and raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub attr: Attr,
    pub text: String,
}

/// A rendered image reference.
///
/// `target` is either a `data:` URI (inline artifact) or a path relative to
/// the document output root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Mime type of the referenced artifact.
    pub mime: String,
    /// Artifact reference: `data:` URI or relative path.
    pub target: String,
}

/// A figure wrapping a rendered image, with optional caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Figure {
    pub attr: Attr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub image: Image,
}

/// A block-level document node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Block {
    /// Fenced code block.
    CodeBlock(CodeBlock),
    /// Figure with a rendered image.
    Figure(Figure),
    /// A container of nested blocks (section, quote, list item, ...).
    Container { attr: Attr, children: Vec<Block> },
    /// Opaque content the pipeline never touches.
    Raw { text: String },
}

/// A parsed document: a sequence of block nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    /// Visit every block in the tree, depth-first, in document order.
    pub fn for_each_block<'a>(&'a self, f: &mut impl FnMut(&'a Block)) {
        fn walk<'a>(blocks: &'a [Block], f: &mut impl FnMut(&'a Block)) {
            for block in blocks {
                f(block);
                if let Block::Container { children, .. } = block {
                    walk(children, f);
                }
            }
        }
        walk(&self.blocks, f);
    }

    /// Visit every block mutably, depth-first, in document order.
    ///
    /// The visitor may replace the node in place; children of a replaced
    /// container are not re-visited.
    pub fn for_each_block_mut(&mut self, f: &mut impl FnMut(&mut Block)) {
        fn walk(blocks: &mut [Block], f: &mut impl FnMut(&mut Block)) {
            for block in blocks {
                f(block);
                if let Block::Container { children, .. } = block {
                    walk(children, f);
                }
            }
        }
        walk(&mut self.blocks, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn code(classes: &[&str], text: &str) -> Block {
        Block::CodeBlock(CodeBlock {
            attr: Attr {
                id: String::new(),
                classes: classes.iter().map(|s| (*s).to_owned()).collect(),
                pairs: Vec::new(),
            },
            text: text.to_owned(),
        })
    }

    #[test]
    fn test_attr_get_first_declared() {
        let attr = Attr {
            id: "fig1".to_owned(),
            classes: vec!["plantuml".to_owned()],
            pairs: vec![
                ("caption".to_owned(), "First".to_owned()),
                ("caption".to_owned(), "Second".to_owned()),
            ],
        };
        assert_eq!(attr.get("caption"), Some("First"));
        assert_eq!(attr.get("missing"), None);
        assert!(attr.has_class("plantuml"));
        assert!(!attr.has_class("mermaid"));
    }

    #[test]
    fn test_walk_depth_first_order() {
        let doc = Document {
            blocks: vec![
                code(&["a"], "1"),
                Block::Container {
                    attr: Attr::default(),
                    children: vec![code(&["b"], "2"), code(&["c"], "3")],
                },
                code(&["d"], "4"),
            ],
        };

        let mut seen = Vec::new();
        doc.for_each_block(&mut |b| {
            if let Block::CodeBlock(cb) = b {
                seen.push(cb.text.clone());
            }
        });
        assert_eq!(seen, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_walk_mut_replaces_in_place() {
        let mut doc = Document {
            blocks: vec![Block::Container {
                attr: Attr::default(),
                children: vec![code(&["plantuml"], "A -> B")],
            }],
        };

        doc.for_each_block_mut(&mut |b| {
            if matches!(b, Block::CodeBlock(_)) {
                *b = Block::Figure(Figure {
                    attr: Attr::default(),
                    caption: None,
                    image: Image {
                        mime: "image/svg+xml".to_owned(),
                        target: "diagram.svg".to_owned(),
                    },
                });
            }
        });

        let mut figures = 0;
        doc.for_each_block(&mut |b| {
            if matches!(b, Block::Figure(_)) {
                figures += 1;
            }
        });
        assert_eq!(figures, 1);
    }

    #[test]
    fn test_json_round_trip() {
        let doc = Document {
            blocks: vec![
                code(&["mermaid"], "graph TD"),
                Block::Raw {
                    text: "plain paragraph".to_owned(),
                },
                Block::Figure(Figure {
                    attr: Attr {
                        id: "fig".to_owned(),
                        ..Attr::default()
                    },
                    caption: Some("A diagram".to_owned()),
                    image: Image {
                        mime: "image/png".to_owned(),
                        target: "data:image/png;base64,AAAA".to_owned(),
                    },
                }),
            ],
        };

        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn test_code_block_tag_shape() {
        let json = serde_json::to_value(code(&["dot"], "digraph {}")).unwrap();
        assert_eq!(json["type"], "code-block");
        assert_eq!(json["text"], "digraph {}");
    }
}
