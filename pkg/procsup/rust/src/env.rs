// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

/// Split `KEY=VALUE` entries on the first `=`. Key and value are kept
/// verbatim; entries without `=` or with an empty key are returned separately
/// so the caller can report them.
pub fn split_env_entries(entries: &[String]) -> (Vec<(String, String)>, Vec<String>) {
    let mut vars = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((key, val)) if !key.is_empty() => {
                vars.push((key.to_string(), val.to_string()));
            }
            _ => rejected.push(entry.clone()),
        }
    }
    (vars, rejected)
}
