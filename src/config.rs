//! Run configuration from scenario options and the environment.
//!
//! Scenario `options` win over environment variables, which win over the
//! defaults below.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HEADFUL` | `1` shows the browser window | off |
//! | `BROWSER` | Browser engine name | `chromium` |
//! | `VIEWPORT` | Window size, `WxH` | `1366x900` |
//! | `TIMEOUT_MS` | Per-step timeout | `7000` |
//! | `SPEED_S` | Pause after every step, seconds | `0` |
//! | `SLOW_MO` | Pause after every driver action, ms | `0` |
//! | `TRACING` | `1` writes a step trace | `1` |
//! | `VIDEO` | `1` requests video recording | `0` |
//! | `USER_AGENT` | User agent override | unset |
//! | `PROXY_SERVER` / `PROXY_USERNAME` / `PROXY_PASSWORD` | Browser proxy | unset |
//! | `PLANNER_PROVIDER` | `ollama` or `openai` | `ollama` |
//! | `OLLAMA_HOST` | Ollama base URL | `http://localhost:11434` |
//! | `OLLAMA_MODEL` | Ollama model | `llama3` |
//! | `OPENAI_API_KEY` / `OPENAI_MODEL` | OpenAI-compatible planner | unset / `gpt-4o-mini` |
//! | `RPA_REPORTS_DIR` | Root of all run artifacts | `reports` |
//! | `RPA_SUCCESS_PROBE` | Selector proving a login worked | generic vocabulary |

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::driver::{BrowserOptions, ProxySettings};
use crate::planner::HeuristicConfig;

pub const DEFAULT_BROWSER: &str = "chromium";
pub const DEFAULT_VIEWPORT: &str = "1366x900";
pub const DEFAULT_TIMEOUT_MS: u64 = 7000;
pub const DEFAULT_REPORTS_DIR: &str = "reports";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

pub type Variables = BTreeMap<String, String>;

/// Where configuration values come from; the process environment in
/// production, a map in tests.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// `"1366x900"` or `[1366, 900]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ViewportSpec {
    Text(String),
    Pair([u32; 2]),
}

/// `"chromium, firefox"` or `["chromium", "firefox"]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrowserList {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxySpec {
    Server(String),
    Full {
        server: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
}

/// The `options` block of a scenario file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioOptions {
    pub headful: Option<bool>,
    pub browser: Option<String>,
    pub browsers: Option<BrowserList>,
    pub timeout_ms: Option<u64>,
    pub speed_s: Option<f64>,
    pub slow_mo: Option<u64>,
    pub tracing: Option<bool>,
    pub video: Option<bool>,
    pub viewport: Option<ViewportSpec>,
    pub user_agent: Option<String>,
    pub proxy: Option<ProxySpec>,
    pub variables: BTreeMap<String, Value>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub headful: bool,
    pub browser: String,
    /// Empty unless the scenario asked for a multi-browser run.
    pub browsers: Vec<String>,
    pub timeout: Duration,
    pub speed: Duration,
    pub slow_mo: Duration,
    pub tracing: bool,
    pub video: bool,
    pub viewport: Option<(u32, u32)>,
    pub user_agent: Option<String>,
    pub proxy: Option<ProxySettings>,
    pub variables: Variables,
}

fn flag(env: &dyn EnvSource, name: &str, default: bool) -> bool {
    env.var(name).map(|v| v.trim() == "1").unwrap_or(default)
}

fn number<T: std::str::FromStr>(env: &dyn EnvSource, name: &str) -> Option<T> {
    env.var(name).and_then(|v| v.trim().parse().ok())
}

/// Render a scenario variable as the text substituted into steps.
pub fn var_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl RunOptions {
    pub fn load(
        options: &ScenarioOptions,
        scenario_vars: &BTreeMap<String, Value>,
        env: &dyn EnvSource,
    ) -> Self {
        let viewport = match &options.viewport {
            Some(ViewportSpec::Pair([w, h])) => Some((*w, *h)),
            Some(ViewportSpec::Text(s)) => parse_viewport(s),
            None => parse_viewport(&env.var("VIEWPORT").unwrap_or_else(|| DEFAULT_VIEWPORT.into())),
        };

        let browsers = match &options.browsers {
            Some(BrowserList::Text(s)) => s
                .split(',')
                .map(|b| b.trim().to_lowercase())
                .filter(|b| !b.is_empty())
                .collect(),
            Some(BrowserList::List(list)) => list
                .iter()
                .map(|b| b.trim().to_lowercase())
                .filter(|b| !b.is_empty())
                .collect(),
            None => Vec::new(),
        };

        let proxy = match &options.proxy {
            Some(ProxySpec::Server(server)) => Some(ProxySettings {
                server: server.clone(),
                username: None,
                password: None,
            }),
            Some(ProxySpec::Full {
                server,
                username,
                password,
            }) => Some(ProxySettings {
                server: server.clone(),
                username: username.clone(),
                password: password.clone(),
            }),
            None => env.var("PROXY_SERVER").map(|server| ProxySettings {
                server,
                username: env.var("PROXY_USERNAME"),
                password: env.var("PROXY_PASSWORD"),
            }),
        };

        let mut variables: Variables = scenario_vars
            .iter()
            .chain(options.variables.iter())
            .map(|(k, v)| (k.clone(), var_text(v)))
            .collect();
        inject_defaults(&mut variables);

        let speed_s = options
            .speed_s
            .or_else(|| number(env, "SPEED_S"))
            .filter(|s: &f64| s.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 3600.0);

        Self {
            headful: options.headful.unwrap_or_else(|| flag(env, "HEADFUL", false)),
            browser: options
                .browser
                .clone()
                .or_else(|| env.var("BROWSER"))
                .unwrap_or_else(|| DEFAULT_BROWSER.into())
                .to_lowercase(),
            browsers,
            timeout: Duration::from_millis(
                options
                    .timeout_ms
                    .or_else(|| number(env, "TIMEOUT_MS"))
                    .unwrap_or(DEFAULT_TIMEOUT_MS),
            ),
            speed: Duration::from_secs_f64(speed_s),
            slow_mo: Duration::from_millis(
                options.slow_mo.or_else(|| number(env, "SLOW_MO")).unwrap_or(0),
            ),
            tracing: options.tracing.unwrap_or_else(|| flag(env, "TRACING", true)),
            video: options.video.unwrap_or_else(|| flag(env, "VIDEO", false)),
            viewport,
            user_agent: options.user_agent.clone().or_else(|| env.var("USER_AGENT")),
            proxy,
            variables,
        }
    }

    /// Driver settings for `browser`.
    pub fn browser_options(&self, browser: &str) -> BrowserOptions {
        BrowserOptions {
            browser: browser.to_string(),
            headful: self.headful,
            viewport: self.viewport,
            user_agent: self.user_agent.clone(),
            timeout: self.timeout,
            slow_mo: self.slow_mo,
            proxy: self.proxy.clone(),
            video: self.video,
        }
    }
}

/// `RAND` plus signup credentials derived from it, unless already set.
pub fn inject_defaults(variables: &mut Variables) {
    let rand = variables
        .entry("RAND".to_string())
        .or_insert_with(|| rand_token(6))
        .clone();
    variables
        .entry("NEW_USERNAME".to_string())
        .or_insert_with(|| format!("user_{rand}"));
    variables
        .entry("NEW_PASSWORD".to_string())
        .or_insert_with(|| format!("Pw_{rand}!9"));
}

/// Lowercase alphanumeric token.
pub fn rand_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    (0..len)
        .map(|_| ALPHABET[(rand::random::<u32>() as usize) % ALPHABET.len()] as char)
        .collect()
}

/// `1366x900`, `1366 X 900` or `1366×900`.
pub fn parse_viewport(raw: &str) -> Option<(u32, u32)> {
    let cleaned = raw.to_lowercase().replace('×', "x").replace(' ', "");
    let (w, h) = cleaned.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

/// Absolute http(s) targets pass through; anything else joins `base` with
/// exactly one slash.
pub fn resolve_url(base: Option<&str>, target: &str) -> String {
    let target = target.trim();
    if target.is_empty() {
        return String::new();
    }
    if target.starts_with("http://") || target.starts_with("https://") {
        return target.to_string();
    }
    match base.map(str::trim).filter(|b| !b.is_empty()) {
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            target.trim_start_matches('/')
        ),
        None => target.to_string(),
    }
}

/// Literal `${NAME}` replacement; unknown tokens stay as they are.
pub fn substitute_vars(value: &str, variables: &Variables) -> String {
    if !value.contains("${") {
        return value.to_string();
    }
    variables.iter().fold(value.to_string(), |out, (k, v)| {
        out.replace(&format!("${{{k}}}"), v)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub ollama_host: String,
    pub model: String,
    pub openai_api_key: Option<String>,
}

impl LlmSettings {
    pub fn from_env(env: &dyn EnvSource, model_override: Option<&str>) -> Self {
        let provider = match env.var("PLANNER_PROVIDER").map(|p| p.to_lowercase()) {
            Some(p) if p == "openai" => LlmProvider::OpenAi,
            _ => LlmProvider::Ollama,
        };
        let model = model_override.map(str::to_string).unwrap_or_else(|| match provider {
            LlmProvider::Ollama => env
                .var("OLLAMA_MODEL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.into()),
            LlmProvider::OpenAi => env
                .var("OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
        });
        Self {
            provider,
            ollama_host: env
                .var("OLLAMA_HOST")
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.into()),
            model,
            openai_api_key: env.var("OPENAI_API_KEY"),
        }
    }
}

pub fn reports_dir(env: &dyn EnvSource) -> PathBuf {
    PathBuf::from(
        env.var("RPA_REPORTS_DIR")
            .unwrap_or_else(|| DEFAULT_REPORTS_DIR.into()),
    )
}

pub fn heuristic_config(env: &dyn EnvSource) -> HeuristicConfig {
    let mut config = HeuristicConfig::default();
    if let Some(probe) = env.var("RPA_SUCCESS_PROBE") {
        config.success_probe = probe;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let opts = RunOptions::load(&ScenarioOptions::default(), &BTreeMap::new(), &env(&[]));
        assert!(!opts.headful);
        assert_eq!(opts.browser, "chromium");
        assert_eq!(opts.timeout, Duration::from_millis(7000));
        assert_eq!(opts.viewport, Some((1366, 900)));
        assert!(opts.tracing);
        assert!(!opts.video);
        assert!(opts.browsers.is_empty());
        assert_eq!(opts.variables["RAND"].len(), 6);
        assert!(opts.variables["NEW_USERNAME"].ends_with(&opts.variables["RAND"]));
    }

    #[test]
    fn test_options_override_env() {
        let options: ScenarioOptions = serde_json::from_value(json!({
            "headful": false,
            "browser": "Firefox",
            "browsers": "chromium, webkit",
            "timeout_ms": 1000,
            "viewport": [800, 600],
            "proxy": "http://proxy.local:3128",
            "variables": {"USERNAME": "bob", "RAND": "fixed1"}
        }))
        .unwrap();
        let e = env(&[("HEADFUL", "1"), ("TIMEOUT_MS", "9000"), ("PROXY_SERVER", "http://other:1")]);
        let scenario_vars = BTreeMap::from([
            ("USERNAME".to_string(), json!("alice")),
            ("PIN".to_string(), json!(1234)),
        ]);
        let opts = RunOptions::load(&options, &scenario_vars, &e);
        assert!(!opts.headful);
        assert_eq!(opts.browser, "firefox");
        assert_eq!(opts.browsers, vec!["chromium", "webkit"]);
        assert_eq!(opts.timeout, Duration::from_millis(1000));
        assert_eq!(opts.viewport, Some((800, 600)));
        assert_eq!(opts.proxy.unwrap().server, "http://proxy.local:3128");
        assert_eq!(opts.variables["USERNAME"], "bob");
        assert_eq!(opts.variables["PIN"], "1234");
        assert_eq!(opts.variables["NEW_PASSWORD"], "Pw_fixed1!9");
    }

    #[test]
    fn test_env_proxy_and_flags() {
        let e = env(&[
            ("PROXY_SERVER", "http://p:8080"),
            ("PROXY_USERNAME", "u"),
            ("TRACING", "0"),
            ("VIDEO", "1"),
            ("VIEWPORT", "1280×720"),
            ("SPEED_S", "0.25"),
        ]);
        let opts = RunOptions::load(&ScenarioOptions::default(), &BTreeMap::new(), &e);
        let proxy = opts.proxy.unwrap();
        assert_eq!(proxy.username.as_deref(), Some("u"));
        assert_eq!(proxy.password, None);
        assert!(!opts.tracing);
        assert!(opts.video);
        assert_eq!(opts.viewport, Some((1280, 720)));
        assert_eq!(opts.speed, Duration::from_millis(250));
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url(Some("https://a.test/"), "/login"), "https://a.test/login");
        assert_eq!(resolve_url(Some("https://a.test"), "login"), "https://a.test/login");
        assert_eq!(resolve_url(Some("https://a.test"), "https://b.test/x"), "https://b.test/x");
        assert_eq!(resolve_url(None, "/login"), "/login");
        assert_eq!(resolve_url(Some("https://a.test"), ""), "");
    }

    #[test]
    fn test_substitution_leaves_unknown_tokens() {
        let vars = Variables::from([("USER".to_string(), "bob".to_string())]);
        assert_eq!(substitute_vars("${USER}:${USER}", &vars), "bob:bob");
        assert_eq!(substitute_vars("${MISSING}-x", &vars), "${MISSING}-x");
    }

    #[test]
    fn test_llm_settings() {
        let s = LlmSettings::from_env(&env(&[("PLANNER_PROVIDER", "OpenAI"), ("OPENAI_API_KEY", "sk")]), None);
        assert_eq!(s.provider, LlmProvider::OpenAi);
        assert_eq!(s.model, DEFAULT_OPENAI_MODEL);
        let s = LlmSettings::from_env(&env(&[]), Some("mistral"));
        assert_eq!((s.provider, s.model.as_str()), (LlmProvider::Ollama, "mistral"));
    }

    #[test]
    fn test_parse_viewport_rejects_garbage() {
        assert_eq!(parse_viewport("wide"), None);
        assert_eq!(parse_viewport("1024 x 768"), Some((1024, 768)));
    }
}
