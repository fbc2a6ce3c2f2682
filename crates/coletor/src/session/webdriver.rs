//! W3C WebDriver backend: a private chromedriver per session, driven through
//! `fantoccini` on a small current-thread runtime.

use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator as WdLocator};
use serde_json::{json, Map, Value};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::driver::{Driver, DriverError, ElementState, KillSwitch, SelectOption};
use super::factory::{SessionFactory, SessionSpec};
use super::locator::Locator;
use super::BrowserSession;
use crate::cancel::CancelToken;
use crate::config::WebDriverSettings;
use crate::error::SessionError;

const OPTIONS_SCRIPT: &str =
    "return Array.from(arguments[0].options).map(o => [o.value, o.text, o.title || '']);";

/// Opens sessions backed by real Chrome browsers.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    settings: WebDriverSettings,
}

impl WebDriverFactory {
    pub fn new(settings: WebDriverSettings) -> Self {
        Self { settings }
    }

    fn chromedriver(&self) -> Result<PathBuf, SessionError> {
        match &self.settings.chromedriver {
            Some(path) => Ok(path.clone()),
            None => which::which("chromedriver").map_err(|e| {
                SessionError::Startup(format!("chromedriver not found on PATH: {}", e))
            }),
        }
    }

    /// Chrome capabilities for one session.
    pub fn capabilities(&self, spec: &SessionSpec) -> Map<String, Value> {
        let mut args: Vec<String> = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--window-size=1920,1080".to_string(),
        ];
        if self.settings.headless {
            args.push("--headless=new".to_string());
        }
        if spec.relaxed_tls {
            args.push("--ignore-certificate-errors".to_string());
            args.push("--allow-running-insecure-content".to_string());
        }
        args.extend(self.settings.extra_args.iter().cloned());

        let mut chrome = json!({
            "args": args,
            "prefs": {
                "download.default_directory": spec.download_dir.to_string_lossy(),
                "download.prompt_for_download": false,
                "download.directory_upgrade": true,
                "safebrowsing.enabled": true,
                "plugins.always_open_pdf_externally": true
            }
        });
        if let Some(binary) = &self.settings.browser_binary {
            chrome["binary"] = json!(binary.to_string_lossy());
        }

        let mut caps = Map::new();
        caps.insert("browserName".to_string(), json!("chrome"));
        caps.insert("goog:chromeOptions".to_string(), chrome);
        if spec.relaxed_tls {
            caps.insert("acceptInsecureCerts".to_string(), json!(true));
        }
        caps
    }
}

impl SessionFactory for WebDriverFactory {
    fn open(
        &self,
        spec: &SessionSpec,
        cancel: &CancelToken,
    ) -> Result<BrowserSession, SessionError> {
        std::fs::create_dir_all(&spec.download_dir).map_err(|e| SessionError::DownloadDir {
            path: spec.download_dir.clone(),
            source: e,
        })?;

        let driver = match &self.settings.remote_url {
            Some(url) => WebDriverDriver::connect(url, self.capabilities(spec), None, &spec.label)?,
            None => {
                let binary = self.chromedriver()?;
                let process = ProcessGuard::spawn(&binary, &spec.label)?;
                process.wait_until_listening(self.settings.startup_timeout())?;
                let url = format!("http://127.0.0.1:{}", process.port);
                WebDriverDriver::connect(&url, self.capabilities(spec), Some(process), &spec.label)?
            }
        };

        info!(session = %spec.label, relaxed_tls = spec.relaxed_tls, "Browser session started");
        BrowserSession::new(spec, Box::new(driver), cancel.clone())
    }
}

/// A chromedriver child process living in its own process group.
struct ProcessGuard {
    child: Child,
    port: u16,
    label: String,
}

impl ProcessGuard {
    fn spawn(binary: &Path, label: &str) -> Result<Self, SessionError> {
        let port = free_port()?;
        let mut command = Command::new(binary);
        command
            .arg(format!("--port={}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| {
            SessionError::Startup(format!("failed to launch '{}': {}", binary.display(), e))
        })?;
        debug!(session = label, pid = child.id(), port, "chromedriver spawned");

        Ok(Self {
            child,
            port,
            label: label.to_string(),
        })
    }

    fn wait_until_listening(&self, budget: Duration) -> Result<(), SessionError> {
        let started = Instant::now();
        while started.elapsed() < budget {
            if TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        Err(SessionError::Startup(format!(
            "chromedriver did not listen on port {} within {:?}",
            self.port, budget
        )))
    }

    fn kill_switch(&self) -> KillSwitch {
        let pid = self.child.id();
        KillSwitch::new(self.label.clone(), move || kill_tree(pid))
    }

    fn terminate(&mut self) {
        kill_tree(self.child.id());
        if let Err(e) = self.child.wait() {
            warn!(session = %self.label, error = %e, "Could not reap chromedriver");
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.terminate();
        }
    }
}

fn free_port() -> Result<u16, SessionError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| SessionError::Startup(format!("no free local port: {}", e)))?;
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| SessionError::Startup(format!("no free local port: {}", e)))
}

/// Kills the whole process tree rooted at `pid` (chromedriver and its browsers).
#[cfg(unix)]
fn kill_tree(pid: u32) {
    // SAFETY: plain syscall; the negative pid addresses the process group
    // created for chromedriver at spawn time.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, "Process group already gone");
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        warn!(pid, error = %e, "taskkill failed");
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(pid: u32) {
    warn!(pid, "Hard kill is not supported on this platform");
}

pub struct WebDriverDriver {
    runtime: Runtime,
    client: Client,
    process: Option<ProcessGuard>,
    label: String,
}

impl WebDriverDriver {
    fn connect(
        url: &str,
        capabilities: Map<String, Value>,
        process: Option<ProcessGuard>,
        label: &str,
    ) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SessionError::Startup(format!("failed to build runtime: {}", e)))?;

        let client = runtime
            .block_on(async {
                ClientBuilder::native()
                    .capabilities(capabilities)
                    .connect(url)
                    .await
            })
            .map_err(|e| SessionError::Startup(format!("WebDriver session refused: {}", e)))?;

        Ok(Self {
            runtime,
            client,
            process,
            label: label.to_string(),
        })
    }
}

fn name_selector(name: &str) -> String {
    format!("[name=\"{}\"]", name)
}

fn classify(locator: &Locator, e: CmdError) -> DriverError {
    if matches!(e, CmdError::Lost(_)) {
        return DriverError::SessionLost(e.to_string());
    }
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("invalid session id")
        || lower.contains("no such window")
        || lower.contains("chrome not reachable")
        || lower.contains("session deleted")
    {
        DriverError::SessionLost(message)
    } else if e.is_no_such_element() {
        DriverError::NoSuchElement(locator.to_string())
    } else if lower.contains("not interactable")
        || lower.contains("click intercepted")
        || lower.contains("stale element")
    {
        DriverError::NotInteractable(format!("{}: {}", locator, message))
    } else {
        DriverError::Other(message)
    }
}

async fn find(
    client: &Client,
    locator: &Locator,
) -> Result<fantoccini::elements::Element, DriverError> {
    let css;
    let wd = match locator {
        Locator::Css(s) => WdLocator::Css(s),
        Locator::XPath(s) => WdLocator::XPath(s),
        Locator::Id(s) => WdLocator::Id(s),
        Locator::Name(s) => {
            css = name_selector(s);
            WdLocator::Css(&css)
        }
    };
    client.find(wd).await.map_err(|e| classify(locator, e))
}

impl Driver for WebDriverDriver {
    fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        let page = Locator::css("html");
        let client = &self.client;
        self.runtime
            .block_on(async { client.goto(url).await })
            .map_err(|e| classify(&page, e))
    }

    fn probe(&mut self, locator: &Locator) -> Result<Option<ElementState>, DriverError> {
        let client = &self.client;
        self.runtime.block_on(async {
            let element = match find(client, locator).await {
                Ok(element) => element,
                Err(DriverError::NoSuchElement(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            let displayed = element
                .is_displayed()
                .await
                .map_err(|e| classify(locator, e))?;
            let enabled = element
                .is_enabled()
                .await
                .map_err(|e| classify(locator, e))?;
            Ok(Some(ElementState { displayed, enabled }))
        })
    }

    fn click(&mut self, locator: &Locator) -> Result<(), DriverError> {
        let client = &self.client;
        self.runtime.block_on(async {
            find(client, locator)
                .await?
                .click()
                .await
                .map(|_| ())
                .map_err(|e| classify(locator, e))
        })
    }

    fn clear(&mut self, locator: &Locator) -> Result<(), DriverError> {
        let client = &self.client;
        self.runtime.block_on(async {
            find(client, locator)
                .await?
                .clear()
                .await
                .map_err(|e| classify(locator, e))
        })
    }

    fn send_keys(&mut self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        let client = &self.client;
        self.runtime.block_on(async {
            find(client, locator)
                .await?
                .send_keys(text)
                .await
                .map_err(|e| classify(locator, e))
        })
    }

    fn select_by_value(&mut self, locator: &Locator, value: &str) -> Result<(), DriverError> {
        let client = &self.client;
        self.runtime.block_on(async {
            find(client, locator)
                .await?
                .select_by_value(value)
                .await
                .map(|_| ())
                .map_err(|e| classify(locator, e))
        })
    }

    fn select_by_text(&mut self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        let client = &self.client;
        self.runtime.block_on(async {
            find(client, locator)
                .await?
                .select_by_label(text)
                .await
                .map(|_| ())
                .map_err(|e| classify(locator, e))
        })
    }

    fn options(&mut self, locator: &Locator) -> Result<Vec<SelectOption>, DriverError> {
        let client = &self.client;
        let raw = self.runtime.block_on(async {
            let element = find(client, locator).await?;
            let arg = serde_json::to_value(&element)
                .map_err(|e| DriverError::Other(format!("element handle: {}", e)))?;
            client
                .execute(OPTIONS_SCRIPT, vec![arg])
                .await
                .map_err(|e| classify(locator, e))
        })?;

        let rows = raw.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                let cells = row.as_array()?;
                let cell = |i: usize| {
                    cells
                        .get(i)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                Some(SelectOption {
                    value: cell(0),
                    text: cell(1),
                    title: cell(2),
                })
            })
            .collect())
    }

    fn text(&mut self, locator: &Locator) -> Result<String, DriverError> {
        let client = &self.client;
        self.runtime.block_on(async {
            find(client, locator)
                .await?
                .text()
                .await
                .map_err(|e| classify(locator, e))
        })
    }

    fn page_source(&mut self) -> Result<String, DriverError> {
        let page = Locator::css("html");
        let client = &self.client;
        self.runtime
            .block_on(async { client.source().await })
            .map_err(|e| classify(&page, e))
    }

    fn quit(&mut self) -> Result<(), DriverError> {
        let page = Locator::css("html");
        let client = self.client.clone();
        let result = self
            .runtime
            .block_on(async { client.close().await })
            .map_err(|e| classify(&page, e));
        if let Some(mut process) = self.process.take() {
            process.terminate();
        }
        debug!(session = %self.label, "WebDriver session ended");
        result
    }

    fn kill_switch(&self) -> Option<KillSwitch> {
        self.process.as_ref().map(ProcessGuard::kill_switch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(relaxed: bool) -> SessionSpec {
        SessionSpec::new("w0-main", "/tmp/coletor/w0-main").with_relaxed_tls(relaxed)
    }

    #[test]
    fn test_capabilities_pin_download_dir() {
        let factory = WebDriverFactory::new(WebDriverSettings::default());
        let caps = factory.capabilities(&spec(false));
        let prefs = &caps["goog:chromeOptions"]["prefs"];
        assert_eq!(prefs["download.default_directory"], "/tmp/coletor/w0-main");
        assert_eq!(prefs["download.prompt_for_download"], false);
        assert!(!caps.contains_key("acceptInsecureCerts"));
    }

    #[test]
    fn test_relaxed_tls_flags() {
        let factory = WebDriverFactory::new(WebDriverSettings::default());
        let caps = factory.capabilities(&spec(true));
        assert_eq!(caps["acceptInsecureCerts"], true);
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.iter().any(|a| a == "--ignore-certificate-errors"));
    }

    #[test]
    fn test_headless_toggle_and_extra_args() {
        let settings = WebDriverSettings {
            headless: false,
            extra_args: vec!["--lang=pt-BR".to_string()],
            ..WebDriverSettings::default()
        };
        let caps = WebDriverFactory::new(settings).capabilities(&spec(false));
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(!args.iter().any(|a| a == "--headless=new"));
        assert!(args.iter().any(|a| a == "--lang=pt-BR"));
    }

    #[test]
    fn test_name_locator_becomes_css() {
        assert_eq!(name_selector("p_ano"), "[name=\"p_ano\"]");
    }

    #[test]
    fn test_missing_chromedriver_is_startup_error() {
        let settings = WebDriverSettings {
            chromedriver: Some(PathBuf::from("/nonexistent/chromedriver")),
            startup_timeout_secs: 1,
            ..WebDriverSettings::default()
        };
        let factory = WebDriverFactory::new(settings);
        let tmp = tempfile::TempDir::new().unwrap();
        let spec = SessionSpec::new("w0", tmp.path().join("dl"));
        let result = factory.open(&spec, &CancelToken::new());
        assert!(matches!(result, Err(SessionError::Startup(_))));
    }
}
