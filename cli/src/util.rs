use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde_json::json;
use uuid::Uuid;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn print_stderr_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => eprintln!("{s}"),
        Err(_) => eprintln!("{value}"),
    }
}

pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}

/// Print a structured error and exit with the usage-error code.
pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    print_stderr_json(&err);
    std::process::exit(4);
}

/// The API key to send, or a usage error if none is configured.
pub fn require_api_key(api_key: Option<&str>) -> String {
    match api_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => key.to_string(),
        None => exit_error(
            "No API key configured",
            Some("Set HEARTH_API_KEY or pass --api-key. Keys are created with `hearth admin create-key`."),
        ),
    }
}

/// Execute an API request, print the response, return a structured exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
    query: &[(String, String)],
) -> i32 {
    let url = match reqwest::Url::parse(&format!("{api_url}{path}")) {
        Ok(mut u) => {
            if !query.is_empty() {
                let mut q = u.query_pairs_mut();
                for (k, v) in query {
                    q.append_pair(k, v);
                }
            }
            u
        }
        Err(e) => {
            print_stderr_json(&json!({
                "error": "cli_error",
                "message": format!("Invalid URL: {api_url}{path}: {e}")
            }));
            return 4;
        }
    };

    let mut req = client().request(method.clone(), url);
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    if let Some(b) = body {
        req = req.json(&b);
    }

    tracing::debug!(method = %method, path = path, "api request");
    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            print_stderr_json(&json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check HEARTH_API_URL."
            }));
            return 3;
        }
    };

    let status = resp.status().as_u16();
    let exit_code = exit_code_for_status(status);
    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    if exit_code == 0 {
        print_json(&resp_body);
    } else {
        print_stderr_json(&resp_body);
    }
    exit_code
}

pub fn exit_code_for_status(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hearth")
}

/// Recommendation ids the user dismissed, per home. Dismissals are permanent
/// until explicitly reset; the server never stores them.
#[derive(Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DismissedStore {
    #[serde(default)]
    homes: BTreeMap<Uuid, BTreeSet<String>>,
}

impl DismissedStore {
    pub fn default_path() -> PathBuf {
        config_dir().join("dismissed.json")
    }

    /// A missing or unreadable file is an empty store.
    pub fn load(path: &Path) -> Self {
        let Ok(data) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable dismissed store");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn for_home(&self, home_id: Uuid) -> Vec<String> {
        self.homes
            .get(&home_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns false if the id was already dismissed.
    pub fn dismiss(&mut self, home_id: Uuid, id: &str) -> bool {
        self.homes
            .entry(home_id)
            .or_default()
            .insert(id.trim().to_string())
    }

    /// Forget dismissals for one home, or for all homes.
    pub fn reset(&mut self, home_id: Option<Uuid>) {
        match home_id {
            Some(home_id) => {
                self.homes.remove(&home_id);
            }
            None => self.homes.clear(),
        }
    }
}

/// Read JSON from a file path or stdin (when path is "-").
pub fn read_json_from_file(path: &str) -> Result<serde_json::Value, String> {
    let raw = if path == "-" {
        std::io::read_to_string(std::io::stdin())
            .map_err(|e| format!("Failed to read stdin: {e}"))?
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in '{path}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("hearth-cli-test-{}", Uuid::now_v7()))
            .join("dismissed.json")
    }

    #[test]
    fn status_codes_map_to_exit_codes() {
        assert_eq!(exit_code_for_status(200), 0);
        assert_eq!(exit_code_for_status(201), 0);
        assert_eq!(exit_code_for_status(404), 1);
        assert_eq!(exit_code_for_status(429), 1);
        assert_eq!(exit_code_for_status(503), 2);
    }

    #[test]
    fn dismissed_store_round_trips_through_disk() {
        let path = temp_path();
        let home = Uuid::now_v7();
        let mut store = DismissedStore::load(&path);
        assert!(store.for_home(home).is_empty());

        assert!(store.dismiss(home, "add_photo:hvac"));
        assert!(!store.dismiss(home, "add_photo:hvac"));
        store.dismiss(home, "confirm_install:roof");
        store.save(&path).unwrap();

        let reloaded = DismissedStore::load(&path);
        assert_eq!(
            reloaded.for_home(home),
            vec!["add_photo:hvac".to_string(), "confirm_install:roof".to_string()]
        );
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn reset_is_scoped_to_home() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let mut store = DismissedStore::default();
        store.dismiss(a, "add_photo:hvac");
        store.dismiss(b, "add_photo:roof");

        store.reset(Some(a));
        assert!(store.for_home(a).is_empty());
        assert_eq!(store.for_home(b).len(), 1);

        store.reset(None);
        assert_eq!(store, DismissedStore::default());
    }

    #[test]
    fn corrupt_store_loads_empty() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(DismissedStore::load(&path), DismissedStore::default());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
