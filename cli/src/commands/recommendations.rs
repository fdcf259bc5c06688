use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::util::{DismissedStore, api_request, exit_error, print_json, require_api_key};

#[derive(Subcommand)]
pub enum RecommendationCommands {
    /// Show the top recommendations, hiding locally dismissed ones
    List {
        #[arg(long)]
        home: Uuid,
    },
    /// Dismiss a recommendation so it is never shown again
    Dismiss {
        #[arg(long)]
        home: Uuid,
        /// Recommendation id, e.g. add_photo:hvac
        #[arg(long)]
        id: String,
    },
    /// Forget dismissals for one home, or for every home
    Reset {
        #[arg(long)]
        home: Option<Uuid>,
    },
}

pub async fn run(api_url: &str, api_key: Option<&str>, command: RecommendationCommands) -> i32 {
    let path = DismissedStore::default_path();
    match command {
        RecommendationCommands::List { home } => {
            let token = require_api_key(api_key);
            let store = DismissedStore::load(&path);
            let query = dismissed_query(&store, home);
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/homes/{home}/recommendations"),
                Some(&token),
                None,
                &query,
            )
            .await
        }
        RecommendationCommands::Dismiss { home, id } => {
            if id.trim().is_empty() {
                exit_error("Recommendation id must not be empty", None);
            }
            let mut store = DismissedStore::load(&path);
            let newly = store.dismiss(home, &id);
            save_or_exit(&store, &path);
            print_json(&json!({
                "home_id": home,
                "dismissed": id.trim(),
                "already_dismissed": !newly,
            }));
            0
        }
        RecommendationCommands::Reset { home } => {
            let mut store = DismissedStore::load(&path);
            store.reset(home);
            save_or_exit(&store, &path);
            print_json(&json!({ "reset": home.map_or_else(|| "all".to_string(), |h| h.to_string()) }));
            0
        }
    }
}

fn dismissed_query(store: &DismissedStore, home: Uuid) -> Vec<(String, String)> {
    let ids = store.for_home(home);
    if ids.is_empty() {
        Vec::new()
    } else {
        vec![("dismissed".to_string(), ids.join(","))]
    }
}

fn save_or_exit(store: &DismissedStore, path: &std::path::Path) {
    if let Err(e) = store.save(path) {
        exit_error(
            &format!("Failed to write {}: {e}", path.display()),
            Some("Check permissions on the hearth config directory."),
        );
    }
}
