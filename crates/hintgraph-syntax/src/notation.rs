//! Tree notation reader.
//!
//! Trees are written as s-expressions: `(kind value? children...)`, e.g.
//!
//! ```text
//! (module
//!   (assign (name x) (const 1))
//!   (if (compare > (name x) (const 0))
//!     (block (expr (call (name print) (name x))))))
//! ```
//!
//! A value is a bare token (no whitespace, parentheses or quotes) or a
//! double-quoted string with `\"`, `\\`, `\n` and `\t` escapes. This reads
//! already-parsed trees; it is not a source-language parser.

use crate::tree::{NestedNode, NodeKind, SyntaxTree};
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while1},
    character::complete::{char as pchar, multispace0, multispace1},
    combinator::{cut, map, map_opt, opt, value},
    error::{context, VerboseError, VerboseErrorKind},
    sequence::{delimited, preceded, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tree notation error at byte {offset}: {message}")]
pub struct NotationError {
    pub offset: usize,
    pub message: String,
}

/// Reader limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotationLimits {
    /// Deepest accepted nesting; the root is level 1.
    pub max_depth: usize,
}

impl Default for NotationLimits {
    fn default() -> Self {
        Self { max_depth: 10_000 }
    }
}

/// Parse tree notation into the nested form.
pub fn parse_nested(text: &str) -> Result<NestedNode, NotationError> {
    parse_nested_with(text, NotationLimits::default())
}

/// Parse tree notation into an arena tree (preorder layout).
pub fn parse_tree(text: &str) -> Result<SyntaxTree, NotationError> {
    parse_tree_with(text, NotationLimits::default())
}

pub fn parse_tree_with(text: &str, limits: NotationLimits) -> Result<SyntaxTree, NotationError> {
    parse_nested_with(text, limits).map(|n| SyntaxTree::from_nested(&n))
}

/// Parse with explicit limits. Open nodes live on a stack, so nesting costs
/// heap, not call depth.
pub fn parse_nested_with(text: &str, limits: NotationLimits) -> Result<NestedNode, NotationError> {
    let offset = |rest: &str| text.len() - rest.len();
    let fail = |rest: &str, message: &str| NotationError {
        offset: offset(rest),
        message: message.to_string(),
    };

    let mut open: Vec<NestedNode> = Vec::new();
    let (mut input, _) = lift(text, multispace0(text))?;
    loop {
        let (rest, (kind, value)) = lift(text, head(input))?;
        if open.len() >= limits.max_depth {
            return Err(NotationError {
                offset: offset(input),
                message: format!("nesting deeper than {} levels", limits.max_depth),
            });
        }
        open.push(NestedNode {
            kind,
            value,
            children: Vec::new(),
        });
        input = rest;

        // Close finished nodes until the next child starts.
        loop {
            let (rest, _) = lift(text, multispace0(input))?;
            input = rest;
            let Some(after) = input.strip_prefix(')') else {
                if input.starts_with('(') {
                    break;
                }
                return Err(if input.is_empty() {
                    fail(input, "unexpected end of input")
                } else {
                    fail(input, "expected `)`")
                });
            };
            input = after;
            let Some(done) = open.pop() else {
                return Err(fail(input, "unbalanced `)`"));
            };
            match open.last_mut() {
                Some(parent) => parent.children.push(done),
                None => {
                    let (rest, _) = lift(text, multispace0(input))?;
                    if !rest.is_empty() {
                        return Err(fail(rest, "unexpected input after the tree"));
                    }
                    return Ok(done);
                }
            }
        }
    }
}

fn lift<'a, T>(text: &str, r: Res<'a, T>) -> Result<(&'a str, T), NotationError> {
    match r {
        Ok(ok) => Ok(ok),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(convert_error(text, e)),
        Err(nom::Err::Incomplete(_)) => Err(NotationError {
            offset: text.len(),
            message: "unexpected end of input".to_string(),
        }),
    }
}

fn convert_error(text: &str, e: VerboseError<&str>) -> NotationError {
    // Innermost position, outermost context label.
    let offset = e
        .errors
        .first()
        .map(|(rest, _)| text.len() - rest.len())
        .unwrap_or(0);
    let label = e.errors.iter().rev().find_map(|(_, kind)| match kind {
        VerboseErrorKind::Context(c) => Some(*c),
        _ => None,
    });
    let innermost = e.errors.iter().find_map(|(_, kind)| match kind {
        VerboseErrorKind::Context(c) => Some(*c),
        _ => None,
    });
    let message = match (innermost, label) {
        (Some(inner), Some(outer)) if inner != outer => format!("expected {inner} (in {outer})"),
        (Some(inner), _) => format!("expected {inner}"),
        _ => "unexpected input".to_string(),
    };
    NotationError { offset, message }
}

fn is_token_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')' && c != '"' && c != '\\'
}

fn node_kind(input: &str) -> Res<'_, NodeKind> {
    context(
        "node kind",
        map_opt(
            take_while1(|c: char| c.is_ascii_lowercase() || c == '_'),
            NodeKind::parse,
        ),
    )(input)
}

fn quoted(input: &str) -> Res<'_, String> {
    let body = escaped_transform(
        is_not("\\\""),
        '\\',
        alt((
            value("\\", tag("\\")),
            value("\"", tag("\"")),
            value("\n", tag("n")),
            value("\t", tag("t")),
        )),
    );
    context(
        "quoted value",
        delimited(
            pchar('"'),
            map(opt(body), Option::unwrap_or_default),
            cut(pchar('"')),
        ),
    )(input)
}

fn bare(input: &str) -> Res<'_, String> {
    map(take_while1(is_token_char), str::to_string)(input)
}

/// `(kind value?`: everything of a node before its children.
fn head(input: &str) -> Res<'_, (NodeKind, Option<String>)> {
    preceded(
        tuple((context("`(`", pchar('(')), multispace0)),
        tuple((
            cut(node_kind),
            opt(preceded(multispace1, alt((quoted, bare)))),
        )),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_program() {
        let n = parse_nested(
            "(module\n  (assign (name x) (const 1))\n  (expr (call (name print) (name x))))",
        )
        .unwrap();
        assert_eq!(n.kind, NodeKind::Module);
        assert_eq!(n.children.len(), 2);
        assert_eq!(n.children[1].children[0].children[0].value.as_deref(), Some("print"));
        assert_eq!(n.size(), 8);
    }

    #[test]
    fn quoted_values_round_trip_through_display() {
        let text = r#"(module (expr (const "a \"b\" c")) (expr (const "")))"#;
        let n = parse_nested(text).unwrap();
        assert_eq!(n.children[0].children[0].value.as_deref(), Some("a \"b\" c"));
        assert_eq!(n.children[1].children[0].value.as_deref(), Some(""));
        assert_eq!(parse_nested(&n.to_sexpr()).unwrap(), n);
    }

    #[test]
    fn operator_values_are_bare_tokens() {
        let n = parse_nested("(bin_op + (const 1) (const 2))").unwrap();
        assert_eq!(n.value.as_deref(), Some("+"));
        let n = parse_nested("(compare >= (name a) (name b))").unwrap();
        assert_eq!(n.value.as_deref(), Some(">="));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = parse_nested("(module (frobnicate))").unwrap_err();
        assert_eq!(err.offset, 9);
        assert!(err.message.contains("node kind"), "{err}");
    }

    #[test]
    fn depth_limit_is_a_parse_error() {
        let limits = NotationLimits { max_depth: 3 };
        assert!(parse_nested_with("(module (expr (name x)))", limits).is_ok());
        let err = parse_nested_with("(module (expr (paren (name x))))", limits).unwrap_err();
        assert_eq!(err.offset, 21);
        assert!(err.message.contains("deeper than 3"), "{err}");
    }

    #[test]
    fn deep_notation_parses_within_the_limit() {
        let depth = 50_000;
        let text = format!(
            "(module (expr {}(name x){}))",
            "(unary_op - ".repeat(depth),
            ")".repeat(depth)
        );
        let limits = NotationLimits { max_depth: depth + 3 };
        let tree = parse_tree_with(&text, limits).unwrap();
        assert_eq!(tree.node_count(), depth + 3);
        assert_eq!(tree.to_sexpr(), text);

        let err = parse_nested(&text).unwrap_err();
        assert!(err.message.contains("deeper than 10000"), "{err}");
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(parse_nested("(module (pass)").is_err());
        assert!(parse_nested("(module)) ").is_err());
        assert!(parse_nested("").is_err());
    }
}
