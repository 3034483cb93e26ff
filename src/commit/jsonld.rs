//! Canonical JSON-LD form of commits.
//!
//! Commits travel as expanded JSON-LD with IRI keys in the
//! `https://ns.flur.ee/ledger#` namespace. The canonical form is stable
//! across runs — sorted keys (the default `serde_json` map is ordered),
//! fixed number formats, UTF-8 — and the commit id is the SHA-256 of the
//! canonical form with the `@id` and `address` entries withheld.

use serde_json::{json, Map, Value};

use super::{Commit, CommitData, CommitRef, IndexData, IndexRef, DATA_VERSION};
use crate::error::{LedgerError, Result};
use crate::storage::content_hash;

/// The ledger vocabulary namespace.
pub const LEDGER_NS: &str = "https://ns.flur.ee/ledger#";

fn iri(term: &str) -> String {
    format!("{LEDGER_NS}{term}")
}

fn wrap_value(v: Value) -> Value {
    json!([{ "@value": v }])
}

fn wrap_id(id: &str) -> Value {
    json!([{ "@id": id }])
}

fn node(entries: Vec<(String, Value)>) -> Value {
    let mut map = Map::new();
    for (k, v) in entries {
        map.insert(k, v);
    }
    Value::Object(map)
}

/// Expanded JSON-LD for a commit, including its id and address.
pub fn commit_jsonld(commit: &Commit) -> Value {
    let mut entries: Vec<(String, Value)> = vec![
        ("@id".to_string(), Value::String(commit.id.clone())),
        ("@type".to_string(), json!([iri("Commit")])),
        (iri("alias"), wrap_value(json!(commit.alias))),
        (iri("branch"), wrap_value(json!(commit.branch))),
        (iri("t"), wrap_value(json!(commit.t))),
        (iri("time"), wrap_value(json!(commit.time))),
        (iri("v"), wrap_value(json!(commit.v))),
    ];
    // The storage address is only known once the document is written;
    // readers of an address-less document fill it in from where they
    // fetched it.
    if !commit.address.is_empty() {
        entries.push((iri("address"), wrap_value(json!(commit.address))));
    }
    if let Some(previous) = &commit.previous {
        entries.push((
            iri("previous"),
            json!([{
                "@id": previous.id,
                (iri("address")): [{ "@value": previous.address }],
            }]),
        ));
    }
    if let Some(data) = &commit.data {
        entries.push((
            iri("data"),
            json!([{
                "@id": data.id,
                (iri("address")): [{ "@value": data.address }],
                (iri("t")): [{ "@value": data.t }],
                (iri("flakes")): [{ "@value": data.flakes }],
                (iri("size")): [{ "@value": data.size }],
            }]),
        ));
        entries.push((iri("updates"), wrap_id(&data.address)));
    }
    if let Some(index) = &commit.index {
        entries.push((
            iri("index"),
            json!([{
                "@id": index.id,
                (iri("address")): [{ "@value": index.address }],
                (iri("data")): [{
                    (iri("t")): [{ "@value": index.data.t }],
                    (iri("flakes")): [{ "@value": index.data.flakes }],
                    (iri("size")): [{ "@value": index.data.size }],
                }],
            }]),
        ));
    }
    if !commit.ns.is_empty() {
        let refs: Vec<Value> = commit.ns.iter().map(|a| json!({ "@id": a })).collect();
        entries.push((iri("ns"), Value::Array(refs)));
    }
    if let Some(message) = &commit.message {
        entries.push((iri("message"), wrap_value(json!(message))));
    }
    if !commit.tag.is_empty() {
        let tags: Vec<Value> = commit
            .tag
            .iter()
            .map(|t| json!({ "@value": t }))
            .collect();
        entries.push((iri("tag"), Value::Array(tags)));
    }
    if let Some(author) = &commit.author {
        entries.push((iri("author"), wrap_value(json!(author))));
    }
    if let Some(annotation) = &commit.annotation {
        entries.push((iri("annotation"), wrap_value(json!(annotation))));
    }
    node(entries)
}

/// The hashable form: the canonical document minus `@id`, `address`, and
/// `index`. The index pointer is amended onto an already-chained commit
/// after background indexing completes, so it cannot participate in the
/// identity the chain links through.
pub fn commit_hashable(commit: &Commit) -> Value {
    let mut doc = commit_jsonld(commit);
    if let Some(map) = doc.as_object_mut() {
        map.remove("@id");
        map.remove(&iri("address"));
        map.remove(&iri("index"));
    }
    doc
}

/// Canonical UTF-8 bytes of a JSON-LD document.
pub fn canonical_bytes(doc: &Value) -> Vec<u8> {
    // serde_json maps are key-ordered, so this is already canonical.
    doc.to_string().into_bytes()
}

/// Derives the commit id from its hashable canonical form.
pub fn commit_id(commit: &Commit) -> String {
    let bytes = canonical_bytes(&commit_hashable(commit));
    format!("fluree:commit:sha256:{}", content_hash(&bytes))
}

/// Recomputes and checks a parsed commit's id.
pub fn verify_commit_id(commit: &Commit) -> Result<()> {
    let expected = commit_id(commit);
    if commit.id == expected {
        Ok(())
    } else {
        Err(LedgerError::InvalidCommit(format!(
            "commit id {} does not match canonical hash {expected}",
            commit.id
        )))
    }
}

fn first<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    match doc.get(key) {
        Some(Value::Array(items)) => items.first(),
        other => other,
    }
}

fn get_value<'a>(doc: &'a Value, term: &str) -> Option<&'a Value> {
    first(doc, &iri(term)).and_then(|v| v.get("@value").or(Some(v)))
}

fn get_str(doc: &Value, term: &str) -> Result<String> {
    get_value(doc, term)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LedgerError::Serialization(format!("commit missing {term}")))
}

fn get_opt_str(doc: &Value, term: &str) -> Option<String> {
    get_value(doc, term)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn get_i64(doc: &Value, term: &str) -> Result<i64> {
    get_value(doc, term)
        .and_then(Value::as_i64)
        .ok_or_else(|| LedgerError::Serialization(format!("commit missing {term}")))
}

fn get_u64(doc: &Value, term: &str) -> Result<u64> {
    get_value(doc, term)
        .and_then(Value::as_u64)
        .ok_or_else(|| LedgerError::Serialization(format!("commit missing {term}")))
}

fn node_id(doc: &Value) -> Result<String> {
    doc.get("@id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LedgerError::Serialization("node missing @id".to_string()))
}

/// Parses an expanded JSON-LD commit document.
///
/// A document whose `v` differs from [`DATA_VERSION`] belongs to the SID
/// migration path and is rejected here.
pub fn parse_commit(doc: &Value) -> Result<Commit> {
    let v = get_u64(doc, "v")? as u32;
    if v != DATA_VERSION {
        return Err(LedgerError::InvalidCommit(format!(
            "commit data version {v} requires migration to {DATA_VERSION}"
        )));
    }

    let previous = match first(doc, &iri("previous")) {
        None => None,
        Some(prev) => Some(CommitRef {
            id: node_id(prev)?,
            address: get_str(prev, "address")?,
        }),
    };
    let data = match first(doc, &iri("data")) {
        None => None,
        Some(data) => Some(CommitData {
            id: node_id(data)?,
            address: get_str(data, "address")?,
            t: get_i64(data, "t")?,
            flakes: get_u64(data, "flakes")?,
            size: get_u64(data, "size")?,
        }),
    };
    let index = match first(doc, &iri("index")) {
        None => None,
        Some(index) => {
            let stats = first(index, &iri("data")).ok_or_else(|| {
                LedgerError::Serialization("index pointer missing data".to_string())
            })?;
            Some(IndexRef {
                id: node_id(index)?,
                address: get_str(index, "address")?,
                data: IndexData {
                    t: get_i64(stats, "t")?,
                    flakes: get_u64(stats, "flakes")?,
                    size: get_u64(stats, "size")?,
                },
            })
        }
    };
    let ns = match doc.get(&iri("ns")) {
        Some(Value::Array(items)) => items
            .iter()
            .map(node_id)
            .collect::<Result<Vec<String>>>()?,
        _ => Vec::new(),
    };
    let tag = match doc.get(&iri("tag")) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|t| t.get("@value").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    Ok(Commit {
        id: node_id(doc)?,
        address: get_opt_str(doc, "address").unwrap_or_default(),
        alias: get_str(doc, "alias")?,
        branch: get_str(doc, "branch")?,
        t: get_i64(doc, "t")?,
        previous,
        data,
        index,
        time: get_str(doc, "time")?,
        message: get_opt_str(doc, "message"),
        tag,
        author: get_opt_str(doc, "author"),
        annotation: get_opt_str(doc, "annotation"),
        ns,
        v,
    })
}
