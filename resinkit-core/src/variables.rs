/// Variable substitution (§4.4)
///
/// Walks a JSON document and replaces `$NAME`/`${NAME}` references with
/// values from a lookup table. Grounded on the original service's
/// `misc_utils.py::render_with_string_template`, but resolved per-reference
/// rather than per-string: the original used `string.Template.substitute`,
/// which raises on the first unresolved name and leaves the *entire* string
/// untouched — this substitutes what it can and leaves only the unresolved
/// reference literal (see DESIGN.md, scenario S4).
use std::collections::HashMap;

use rand::Rng;
use regex::Regex;
use serde_json::Value as Json;

/// Matches `${NAME}` or `$NAME` where `NAME` is `[A-Za-z0-9_]+`.
fn reference_pattern() -> Regex {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z0-9_]+)").expect("static pattern is valid")
}

/// Substitutes every resolvable `$NAME`/`${NAME}` reference in `text`.
/// References with no entry in `variables` are left as-is.
pub fn resolve_variables_in_text(text: &str, variables: &HashMap<String, String>) -> String {
    let pattern = reference_pattern();
    pattern
        .replace_all(text, |caps: &regex::Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).unwrap().as_str();
            match variables.get(name) {
                Some(value) => value.clone(),
                None => caps.get(0).unwrap().as_str().to_string(),
            }
        })
        .into_owned()
}

/// Recursively walks a JSON document, substituting variable references in
/// every string value. Non-string scalars and structure are passed through
/// unchanged.
pub fn render_with_variables(document: &Json, variables: &HashMap<String, String>) -> Json {
    match document {
        Json::Object(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_with_variables(v, variables)))
                .collect(),
        ),
        Json::Array(items) => Json::Array(
            items.iter().map(|item| render_with_variables(item, variables)).collect(),
        ),
        Json::String(s) => Json::String(resolve_variables_in_text(s, variables)),
        other => other.clone(),
    }
}

const SHORT_ID_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// A short random id over the same unambiguous base57 alphabet the original
/// service's `ShortUUID` used (digits/letters with `0`, `O`, `I`, `l`
/// removed to avoid transcription mistakes).
pub fn short_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..SHORT_ID_ALPHABET.len());
            SHORT_ID_ALPHABET[idx] as char
        })
        .collect()
}

/// The system-variable overlay injected into every variable resolution
/// (§3.1, §4.4): current epoch milliseconds, a random 16-bit integer, and a
/// fresh 9-character short id.
pub fn get_system_variables() -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert(
        "__NOW_TS10__".to_string(),
        chrono::Utc::now().timestamp_millis().to_string(),
    );
    vars.insert(
        "__RANDOM_16BIT__".to_string(),
        rand::thread_rng().gen_range(0..=32767u16).to_string(),
    );
    vars.insert("__SUUID_9__".to_string(), short_id(9));
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_references() {
        let mut vars = HashMap::new();
        vars.insert("HOST".to_string(), "db.example.com".to_string());
        assert_eq!(
            resolve_variables_in_text("jdbc://${HOST}:5432", &vars),
            "jdbc://db.example.com:5432"
        );
        assert_eq!(resolve_variables_in_text("host=$HOST", &vars), "host=db.example.com");
    }

    #[test]
    fn leaves_unknown_references_literal() {
        let vars = HashMap::new();
        assert_eq!(resolve_variables_in_text("${MISSING}-suffix", &vars), "${MISSING}-suffix");
    }

    #[test]
    fn partial_resolution_does_not_abandon_whole_string() {
        let mut vars = HashMap::new();
        vars.insert("KNOWN".to_string(), "value".to_string());
        assert_eq!(
            resolve_variables_in_text("${KNOWN}/${UNKNOWN}", &vars),
            "value/${UNKNOWN}"
        );
    }

    #[test]
    fn walks_nested_documents() {
        let mut vars = HashMap::new();
        vars.insert("NAME".to_string(), "pipeline-1".to_string());
        let doc = serde_json::json!({
            "job": { "name": "$NAME", "retries": 3 },
            "tags": ["${NAME}-tag"]
        });
        let rendered = render_with_variables(&doc, &vars);
        assert_eq!(rendered["job"]["name"], "pipeline-1");
        assert_eq!(rendered["tags"][0], "pipeline-1-tag");
    }

    #[test]
    fn system_variables_cover_expected_keys() {
        let vars = get_system_variables();
        assert!(vars.contains_key("__NOW_TS10__"));
        assert!(vars.contains_key("__RANDOM_16BIT__"));
        let suuid = &vars["__SUUID_9__"];
        assert_eq!(suuid.len(), 9);
    }
}
