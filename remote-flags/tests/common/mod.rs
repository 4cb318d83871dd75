use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use remote_flags::config::DEFAULT_TEST_CONFIG;
use remote_flags::server::serve_with_store;
use remote_flags::store::MemoryStore;

pub struct ServerHandle {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    client: reqwest::Client,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// Serves a fresh in-memory store on an ephemeral port.
    pub async fn start() -> ServerHandle {
        let store = Arc::new(MemoryStore::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        let served = store.clone();
        tokio::spawn(async move {
            serve_with_store(served, DEFAULT_TEST_CONFIG.clone(), listener, async move {
                notify.notified().await
            })
            .await
        });
        ServerHandle {
            addr,
            store,
            client: reqwest::Client::new(),
            shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{:?}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn patch_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .patch(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn get_with_key(&self, path: &str, key: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header(AUTHORIZATION, format!("Bearer {key}"))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn evaluate<T: Into<reqwest::Body>>(
        &self,
        path: &str,
        key: &str,
        body: T,
    ) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header(AUTHORIZATION, format!("Bearer {key}"))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .expect("failed to send request")
    }

    /// Creates a project with one environment and returns the environment id.
    pub async fn project_with_environment(&self, project: &str, environment: &str) -> String {
        let res = self
            .post_json("/admin/projects", &serde_json::json!({ "name": project }))
            .await;
        assert_eq!(res.status(), reqwest::StatusCode::CREATED);

        self.create_environment(project, environment).await
    }

    pub async fn create_environment(&self, project: &str, environment: &str) -> String {
        let res = self
            .post_json(
                &format!("/admin/projects/{project}"),
                &serde_json::json!({ "name": environment }),
            )
            .await;
        assert_eq!(res.status(), reqwest::StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    /// Issues a key of the given scope ("server_side_key" or "client_side_key").
    pub async fn create_key(&self, environment_id: &str, scope: &str) -> String {
        let res = self
            .post_json(
                &format!("/admin/{environment_id}/{scope}"),
                &serde_json::json!({ "name": "integration" }),
            )
            .await;
        assert_eq!(res.status(), reqwest::StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        body["key"].as_str().unwrap().to_string()
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}
