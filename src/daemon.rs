use super::*;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_RETRIES: u32 = 3;

/// RPC methods the pool is allowed to issue. Everything else is refused at
/// the client boundary.
const ACCEPTED_METHODS: &[&str] = &[
    "getblock",
    "getblockchaininfo",
    "getblocktemplate",
    "getdifficulty",
    "getinfo",
    "getmininginfo",
    "getnetworkinfo",
    "submitblock",
    "validateaddress",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// An error object returned by the daemon, surfaced verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "daemon error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Some daemons emit bare `-nan` tokens in JSON number position; coerce them
/// to zero before parsing.
fn sanitize(body: &str) -> String {
    body.replace(":-nan", ":0").replace(":nan", ":0")
}

fn build_request(id: u64, method: &str, params: &Value) -> Value {
    json!({
        "jsonrpc": "1.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// JSON-RPC 1.0 over HTTP with basic auth. Timeouts retry with exponential
/// backoff; a refused connection surfaces immediately.
pub struct DaemonClient {
    url: String,
    user: String,
    password: String,
    client: reqwest::Client,
    ids: AtomicU64,
}

impl DaemonClient {
    pub fn new(options: &DaemonOptions) -> Result<Self> {
        Ok(Self {
            url: format!("http://{}:{}/", options.host, options.port),
            user: options.user.clone(),
            password: options.password.clone(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .context("failed to build HTTP client")?,
            ids: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let mut attempt = 0;

        let response = loop {
            let result = self
                .client
                .post(self.url.as_str())
                .basic_auth(&self.user, Some(&self.password))
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) => break response,
                Err(err) if err.is_connect() => {
                    return Err(err).context(format!("daemon {} refused connection", self.url));
                }
                Err(err) if err.is_timeout() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let backoff = Duration::from_secs(1 << attempt);
                    warn!(
                        "daemon {} timed out, retry {attempt}/{MAX_RETRIES} in {backoff:?}",
                        self.url
                    );
                    sleep(backoff).await;
                }
                Err(err) => {
                    return Err(err).context(format!("daemon {} request failed", self.url));
                }
            }
        };

        ensure!(
            response.status() != reqwest::StatusCode::UNAUTHORIZED,
            "daemon {} rejected the RPC credentials",
            self.url
        );

        let body = response.text().await?;
        serde_json::from_str(&sanitize(&body))
            .with_context(|| format!("daemon {} returned malformed JSON", self.url))
    }

    fn unwrap_response(response: &Value) -> Result<Value> {
        if let Some(error) = response.get("error").filter(|error| !error.is_null()) {
            let error: RpcError = serde_json::from_value(error.clone())
                .unwrap_or_else(|_| RpcError {
                    code: -32700,
                    message: error.to_string(),
                });
            return Err(Error::new(error));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        ensure!(
            ACCEPTED_METHODS.contains(&method),
            "RPC method {method} is not whitelisted"
        );

        let response = self
            .post(&build_request(self.next_id(), method, &params))
            .await?;

        Self::unwrap_response(&response)
    }

    /// Issues several calls as one HTTP batch. Results come back in request
    /// order regardless of the response ordering on the wire.
    pub async fn batch(
        &self,
        calls: &[(&str, Value)],
    ) -> Result<Vec<Result<Value>>> {
        for (method, _) in calls {
            ensure!(
                ACCEPTED_METHODS.contains(method),
                "RPC method {method} is not whitelisted"
            );
        }

        let requests: Vec<(u64, Value)> = calls
            .iter()
            .map(|(method, params)| {
                let id = self.next_id();
                (id, build_request(id, method, params))
            })
            .collect();

        let body = Value::Array(requests.iter().map(|(_, request)| request.clone()).collect());
        let response = self.post(&body).await?;

        let responses = response
            .as_array()
            .ok_or_else(|| anyhow!("daemon {} returned a non-batch response", self.url))?;

        let by_id: HashMap<u64, &Value> = responses
            .iter()
            .filter_map(|response| Some((response.get("id")?.as_u64()?, response)))
            .collect();

        Ok(requests
            .iter()
            .map(|(id, _)| match by_id.get(id) {
                Some(response) => Self::unwrap_response(response),
                None => Err(anyhow!("daemon {} dropped batch id {id}", self.url)),
            })
            .collect())
    }
}

/// The configured daemon group. Reads go to the first daemon that answers;
/// block submissions fan out to every instance.
pub struct DaemonSet {
    clients: Vec<DaemonClient>,
}

impl DaemonSet {
    pub fn new(options: &[DaemonOptions]) -> Result<Self> {
        ensure!(!options.is_empty(), "no daemons configured");

        Ok(Self {
            clients: options
                .iter()
                .map(DaemonClient::new)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Startup gate: at least one daemon must answer a trivial RPC.
    pub async fn ensure_online(&self) -> Result {
        let mut last_error = None;

        for client in &self.clients {
            match client.call("getdifficulty", json!([])).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!("daemon {} is not responding: {err:#}", client.url());
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .expect("at least one daemon configured")
            .context("no daemon instance is reachable"))
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut last_error = None;

        for client in &self.clients {
            match client.call(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(err) => last_error = Some(err),
            }
        }

        Err(last_error.expect("at least one daemon configured"))
    }

    pub async fn call_all(&self, method: &str, params: Value) -> Vec<Result<Value>> {
        let mut results = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            results.push(client.call(method, params.clone()).await);
        }
        results
    }

    pub fn first(&self) -> &DaemonClient {
        &self.clients[0]
    }
}

/// True when the error chain carries a daemon RPC error with this code.
pub fn rpc_error_code(error: &Error) -> Option<i64> {
    error.downcast_ref::<RpcError>().map(|error| error.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DaemonClient {
        DaemonClient::new(&DaemonOptions {
            host: "127.0.0.1".into(),
            port: 8332,
            user: "u".into(),
            password: "p".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn whitelist_is_enforced() {
        let err = client().call("stop", json!([])).await.unwrap_err();
        assert!(err.to_string().contains("not whitelisted"));

        let err = client()
            .batch(&[("getdifficulty", json!([])), ("stop", json!([]))])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not whitelisted"));
    }

    #[test]
    fn nan_values_are_coerced() {
        let sanitized = sanitize(r#"{"difficulty":-nan,"networkhashps":nan}"#);
        assert_eq!(sanitized, r#"{"difficulty":0,"networkhashps":0}"#);
    }

    #[test]
    fn request_ids_are_unique_within_a_batch() {
        let client = client();
        let a = build_request(client.next_id(), "getdifficulty", &json!([]));
        let b = build_request(client.next_id(), "getmininginfo", &json!([]));
        assert_ne!(a["id"], b["id"]);
    }

    #[test]
    fn rpc_errors_unwrap_verbatim() {
        let response = json!({
            "result": null,
            "error": {"code": -10, "message": "Bitcoin is downloading blocks..."},
            "id": 1
        });

        let err = DaemonClient::unwrap_response(&response).unwrap_err();
        assert_eq!(rpc_error_code(&err), Some(-10));
        assert!(err.to_string().contains("downloading blocks"));
    }

    #[test]
    fn results_unwrap() {
        let response = json!({"result": {"height": 10}, "error": null, "id": 1});
        let result = DaemonClient::unwrap_response(&response).unwrap();
        assert_eq!(result["height"], 10);
    }
}
