//! Transaction operations and streaming NDJSON ingest.
//!
//! Documents are newline-delimited JSON. A `@context` object on the first
//! line supplies prefix expansion for the whole stream. Each further line
//! is a node document: an `@id` plus predicate/value pairs to assert, or a
//! `@retract` wrapper for retractions. Lines flow through a bounded
//! channel one at a time, so a slow consumer backpressures the reader; a
//! malformed line surfaces as an error item and the stream continues,
//! while a read error ends it.

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{LedgerError, Result};
use crate::flake::FlakeValue;

/// The object slot of a transaction operation, before SID resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectSpec {
    /// A reference to another subject.
    Iri(String),
    /// A literal value.
    Value(FlakeValue),
}

/// One assertion or retraction at the IRI level.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOp {
    /// Assert `(s, p, o)`.
    Assert {
        /// Subject IRI.
        s: String,
        /// Predicate IRI.
        p: String,
        /// Object.
        o: ObjectSpec,
    },
    /// Retract `(s, p, o)`.
    Retract {
        /// Subject IRI.
        s: String,
        /// Predicate IRI.
        p: String,
        /// Object.
        o: ObjectSpec,
    },
}

/// Prefix expansion map from a stream's `@context`.
#[derive(Debug, Clone, Default)]
pub struct Context {
    prefixes: FxHashMap<String, String>,
}

impl Context {
    /// Builds a context from a JSON `@context` object.
    pub fn from_json(value: &Value) -> Context {
        let mut prefixes = FxHashMap::default();
        if let Some(obj) = value.as_object() {
            for (k, v) in obj {
                if let Some(iri) = v.as_str() {
                    prefixes.insert(k.clone(), iri.to_string());
                }
            }
        }
        Context { prefixes }
    }

    /// Expands `prefix:term` against the context; unknown prefixes pass
    /// through unchanged.
    pub fn expand(&self, term: &str) -> String {
        if let Some((prefix, suffix)) = term.split_once(':') {
            if let Some(base) = self.prefixes.get(prefix) {
                return format!("{base}{suffix}");
            }
        }
        term.to_string()
    }
}

fn object_from_json(value: &Value, ctx: &Context) -> Result<ObjectSpec> {
    match value {
        Value::String(s) => Ok(ObjectSpec::Value(FlakeValue::Str(s.clone()))),
        Value::Bool(b) => Ok(ObjectSpec::Value(FlakeValue::Bool(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(ObjectSpec::Value(FlakeValue::Int(i)))
            } else {
                Ok(ObjectSpec::Value(FlakeValue::Float(
                    n.as_f64().unwrap_or(f64::NAN),
                )))
            }
        }
        Value::Object(obj) => match obj.get("@id").and_then(Value::as_str) {
            Some(iri) => Ok(ObjectSpec::Iri(ctx.expand(iri))),
            None => Err(LedgerError::InvalidArgument(
                "object node missing @id".to_string(),
            )),
        },
        _ => Err(LedgerError::InvalidArgument(format!(
            "unsupported object value: {value}"
        ))),
    }
}

fn node_to_ops(node: &Value, ctx: &Context, retract: bool, out: &mut Vec<TxOp>) -> Result<()> {
    let obj = node.as_object().ok_or_else(|| {
        LedgerError::InvalidArgument("transaction document is not an object".to_string())
    })?;
    let subject = obj
        .get("@id")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::InvalidArgument("document missing @id".to_string()))?;
    let s = ctx.expand(subject);
    for (key, value) in obj {
        if key.starts_with('@') {
            continue;
        }
        let p = ctx.expand(key);
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for v in values {
            let o = object_from_json(v, ctx)?;
            out.push(if retract {
                TxOp::Retract {
                    s: s.clone(),
                    p: p.clone(),
                    o,
                }
            } else {
                TxOp::Assert {
                    s: s.clone(),
                    p: p.clone(),
                    o,
                }
            });
        }
    }
    Ok(())
}

/// Converts one parsed NDJSON document into transaction operations.
pub fn doc_to_ops(doc: &Value, ctx: &Context) -> Result<Vec<TxOp>> {
    let mut ops = Vec::new();
    if let Some(retract) = doc.get("@retract") {
        let nodes: Vec<&Value> = match retract {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for node in nodes {
            node_to_ops(node, ctx, true, &mut ops)?;
        }
        return Ok(ops);
    }
    node_to_ops(doc, ctx, false, &mut ops)?;
    Ok(ops)
}

/// Streams NDJSON documents as operation batches onto `tx`.
///
/// Returns the number of documents successfully parsed. Parse failures are
/// sent as error items and the stream continues; an I/O failure ends it.
pub async fn stream_ndjson<R>(reader: R, tx: mpsc::Sender<Result<Vec<TxOp>>>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut ctx = Context::default();
    let mut line_no = 0usize;
    let mut parsed = 0usize;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(e.into()),
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Value = match serde_json::from_str(&line) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(line = line_no, error = %e, "transact.ndjson.parse_error");
                let item = Err(LedgerError::NdjsonParse {
                    line: line_no,
                    message: e.to_string(),
                });
                if tx.send(item).await.is_err() {
                    break;
                }
                continue;
            }
        };
        // A leading context line configures the stream and emits nothing.
        if line_no == 1 {
            if let Some(context) = doc.get("@context") {
                ctx = Context::from_json(context);
                if doc.as_object().map(|o| o.len()) == Some(1) {
                    continue;
                }
            }
        }
        let item = doc_to_ops(&doc, &ctx);
        if item.is_ok() {
            parsed += 1;
        }
        if tx.send(item).await.is_err() {
            break;
        }
    }
    Ok(parsed)
}
