pub mod api_keys;
pub mod auth;
pub mod config;
pub mod core;
pub mod follow;
pub mod hashtags;
pub mod likes;
pub mod models;
pub mod notifications;
pub mod posts;
pub mod router;
pub mod templates;
pub mod users;

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
mod component {
    use spin_sdk::http::{IntoResponse, Request};
    use spin_sdk::http_component;

    use crate::core::db::{init_test_data, SpinStore};

    #[http_component]
    fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
        let _ = env_logger::try_init();
        let store = SpinStore::open_default()?;

        if crate::config::seed_demo_data() {
            if let Err(e) = init_test_data(&store) {
                log::warn!("Seeding demo data failed: {:#}", e);
            }
        }

        Ok(crate::router::handle(&store, &req))
    }
}
