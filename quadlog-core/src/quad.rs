// quadlog-core/src/quad.rs
// RDF terms and quads

use std::fmt;

use serde::{Deserialize, Serialize};

/// IRI used as the graph name of triples outside any named graph
pub const DEFAULT_GRAPH_IRI: &str = "urn:x-arq:DefaultGraph";

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

/// A single RDF term
///
/// Blank nodes keep their label verbatim, so identity is preserved within
/// one encoded stream. Labels carry no meaning across streams.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Node {
    Iri(String),
    Blank(String),
    Literal {
        lexical: String,
        datatype: Option<String>,
        language: Option<String>,
    },
}

impl Node {
    pub fn iri(iri: impl Into<String>) -> Self {
        Node::Iri(iri.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Node::Blank(label.into())
    }

    /// Blank node with a freshly generated label
    pub fn fresh_blank() -> Self {
        Node::Blank(format!("b{}", uuid::Uuid::new_v4().simple()))
    }

    /// Plain string literal
    pub fn literal(lexical: impl Into<String>) -> Self {
        Node::Literal {
            lexical: lexical.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Node::Literal {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    pub fn lang_literal(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Node::Literal {
            lexical: lexical.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }

    pub fn default_graph() -> Self {
        Node::Iri(DEFAULT_GRAPH_IRI.to_string())
    }

    pub fn is_default_graph(&self) -> bool {
        matches!(self, Node::Iri(iri) if iri == DEFAULT_GRAPH_IRI)
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Node::Blank(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Node::Literal { .. })
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Iri(iri) => write!(f, "<{}>", iri),
            Node::Blank(label) => write!(f, "_:{}", label),
            Node::Literal {
                lexical,
                datatype,
                language,
            } => {
                write!(f, "{:?}", lexical)?;
                if let Some(lang) = language {
                    write!(f, "@{}", lang)?;
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{}>", dt)?;
                }
                Ok(())
            }
        }
    }
}

/// A (graph, subject, predicate, object) tuple
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub graph: Node,
    pub subject: Node,
    pub predicate: Node,
    pub object: Node,
}

impl Quad {
    pub fn new(graph: Node, subject: Node, predicate: Node, object: Node) -> Self {
        Quad {
            graph,
            subject,
            predicate,
            object,
        }
    }

    /// Quad in the default graph
    pub fn triple(subject: Node, predicate: Node, object: Node) -> Self {
        Quad::new(Node::default_graph(), subject, predicate, object)
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.subject, self.predicate, self.object, self.graph
        )
    }
}

/// Match pattern for `find`; `None` matches any term
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuadPattern {
    pub graph: Option<Node>,
    pub subject: Option<Node>,
    pub predicate: Option<Node>,
    pub object: Option<Node>,
}

impl QuadPattern {
    pub fn any() -> Self {
        QuadPattern::default()
    }

    pub fn graph(mut self, graph: Node) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn subject(mut self, subject: Node) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn predicate(mut self, predicate: Node) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn object(mut self, object: Node) -> Self {
        self.object = Some(object);
        self
    }

    pub fn matches(&self, quad: &Quad) -> bool {
        fn term(pattern: &Option<Node>, node: &Node) -> bool {
            pattern.as_ref().map_or(true, |p| p == node)
        }
        term(&self.graph, &quad.graph)
            && term(&self.subject, &quad.subject)
            && term(&self.predicate, &quad.predicate)
            && term(&self.object, &quad.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_blank_nodes_are_distinct() {
        assert_ne!(Node::fresh_blank(), Node::fresh_blank());
        assert!(Node::fresh_blank().is_blank());
    }

    #[test]
    fn test_default_graph_detection() {
        let q = Quad::triple(Node::iri("s"), Node::iri("p"), Node::literal("o"));
        assert!(q.graph.is_default_graph());
        assert!(!Node::iri("http://example.com/g").is_default_graph());
    }

    #[test]
    fn test_pattern_matching() {
        let g = Node::iri("http://example.com/g1");
        let q = Quad::new(
            g.clone(),
            Node::iri("http://example.com/s1"),
            Node::iri("http://example.com/p1"),
            Node::lang_literal("hallo", "de"),
        );

        assert!(QuadPattern::any().matches(&q));
        assert!(QuadPattern::any().graph(g).matches(&q));
        assert!(!QuadPattern::any()
            .object(Node::literal("hallo"))
            .matches(&q));
    }

    #[test]
    fn test_display() {
        let lit = Node::typed_literal("42", "http://www.w3.org/2001/XMLSchema#int");
        assert_eq!(
            lit.to_string(),
            "\"42\"^^<http://www.w3.org/2001/XMLSchema#int>"
        );
        assert_eq!(Node::blank("x1").to_string(), "_:x1");
    }
}
