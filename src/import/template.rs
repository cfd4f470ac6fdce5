// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Placeholder expansion for realm JSON templates.
//!
//! Placeholders look like `%NAME%` (a leading dot, `%.NAME%`, is also accepted).
//! Percent delimiters keep clear of both JSON braces and `{{ }}` style templating.

use crate::error::{OperatorError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%\.?([A-Za-z_][A-Za-z0-9_]*)%").expect("placeholder pattern is valid")
});

const PEM_BEGIN: &str = "-----BEGIN";
const PEM_END: &str = "-----END";

/// Expand every placeholder in `template`. Fails without producing output if any
/// placeholder has no substitution.
pub fn render(template: &str, substitutions: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let missing: BTreeSet<&str> = PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|name| !substitutions.contains_key(*name))
        .collect();

    if !missing.is_empty() {
        return Err(OperatorError::UnresolvedPlaceholder(
            missing.into_iter().collect::<Vec<_>>().join(", "),
        ));
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        substitutions[&caps[1]].clone()
    });

    Ok(rendered.into_owned().into_bytes())
}

/// Make a value safe to splice into an existing JSON string literal.
///
/// PEM material is passed through untouched so certificates and keys keep their
/// line structure.
pub fn escape_value(value: &str) -> Result<String> {
    if value.contains(PEM_BEGIN) || value.contains(PEM_END) {
        return Ok(value.to_string());
    }

    let quoted = serde_json::to_string(value)?;
    let inner = &quoted[1..quoted.len() - 1];

    Ok(inner
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029"))
}
