//! The `fluree[:identifier]:method[:aux…]://<path>` address scheme.

use crate::error::{LedgerError, Result};

/// A storage address split into its location tokens and path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Optional deployment identifier (distinguished by containing `/`).
    pub identifier: Option<String>,
    /// Storage method, e.g. `memory` or `file`.
    pub method: String,
    /// Auxiliary location components after the method.
    pub aux: Vec<String>,
    /// Path within the store.
    pub path: String,
}

impl ParsedAddress {
    /// Reassembles the location half (everything left of `://`).
    pub fn location(&self) -> String {
        let mut out = String::from("fluree");
        if let Some(id) = &self.identifier {
            out.push(':');
            out.push_str(id);
        }
        out.push(':');
        out.push_str(&self.method);
        for aux in &self.aux {
            out.push(':');
            out.push_str(aux);
        }
        out
    }
}

/// Parses a full storage address.
///
/// The string splits on the first `://`; the left side is the location, the
/// right side the path (leading slashes stripped). Location tokens split on
/// `:`, beginning with the literal `fluree`, followed by an optional
/// identifier (recognized by containing `/` and no `:`), the method, and any
/// auxiliary components.
pub fn parse_address(address: &str) -> Result<ParsedAddress> {
    let (location, path) = address
        .split_once("://")
        .ok_or_else(|| LedgerError::UnknownAddress(address.to_string()))?;
    let path = path.trim_start_matches('/').to_string();

    let mut tokens = location.split(':');
    match tokens.next() {
        Some("fluree") => {}
        _ => return Err(LedgerError::UnknownAddress(address.to_string())),
    }
    let mut rest: Vec<&str> = tokens.collect();
    if rest.is_empty() {
        return Err(LedgerError::UnknownAddress(address.to_string()));
    }
    let identifier = if rest[0].contains('/') {
        Some(rest.remove(0).to_string())
    } else {
        None
    };
    if rest.is_empty() {
        return Err(LedgerError::UnknownAddress(address.to_string()));
    }
    let method = rest.remove(0).to_string();
    Ok(ParsedAddress {
        identifier,
        method,
        aux: rest.into_iter().map(str::to_string).collect(),
        path,
    })
}

/// Builds an address from a location and a path.
pub fn build_address(location: &str, path: &str) -> String {
    format!("{location}://{path}")
}
