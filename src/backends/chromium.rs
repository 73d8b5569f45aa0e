use crate::action::{Action, MouseButton as Button, Point as ActionPoint};
use crate::computer::{Computer, Observation};
use crate::error::ExecError;
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParamsBuilder};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

#[derive(Clone, Debug)]
pub struct ChromiumConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub dimensions: (u32, u32),
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: None,
            dimensions: (1280, 800),
        }
    }
}

/// Raw CDP layer over one page. Anyhow-typed internally; the adapter below
/// maps failures onto the executor taxonomy.
pub struct Chromium {
    page: Page,
    _browser: OxideBrowser,
    dimensions: (u32, u32),
}

impl Chromium {
    pub async fn launch(cfg: ChromiumConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Unique user data dir per run to avoid ProcessSingleton profile
        // lock conflicts when instances are spawned rapidly.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("waldo-profile-{}-{}", std::process::id(), ts));
        let _ = std::fs::create_dir_all(&profile_dir);
        builder = builder.user_data_dir(profile_dir.clone());
        builder = builder
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        Self::attach(browser, cfg).await
    }

    /// Attach to an already-running browser over its devtools websocket.
    pub async fn connect(ws_url: &str, cfg: ChromiumConfig) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        Self::attach(browser, cfg).await
    }

    async fn attach(browser: OxideBrowser, cfg: ChromiumConfig) -> Result<Self> {
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        let (w, h) = cfg.dimensions;
        // Non-zero viewport, or screenshots come back 0-width.
        let _ = page
            .execute(
                SetDeviceMetricsOverrideParams::builder()
                    .width(w as i64)
                    .height(h as i64)
                    .device_scale_factor(1.0)
                    .mobile(false)
                    .build()
                    .unwrap(),
            )
            .await;
        let chromium = Self {
            page,
            _browser: browser,
            dimensions: cfg.dimensions,
        };
        let _ = chromium.pin_to_single_tab().await;
        Ok(chromium)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// Keep link targets in this tab; a second tab would escape control.
    async fn pin_to_single_tab(&self) -> Result<()> {
        self.eval("window.open = (url) => { if (url) location.href = url; return window; }")
            .await
    }

    async fn eval(&self, script: impl Into<String>) -> Result<()> {
        let eval = EvaluateParams::builder()
            .expression(script.into())
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        self.page.execute(eval).await?;
        Ok(())
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        let _ = self.pin_to_single_tab().await;
        Ok(())
    }

    pub async fn back(&self) -> Result<()> {
        self.eval("history.back()").await?;
        self.wait_for_stable().await
    }

    pub async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    pub async fn move_mouse(&self, x: i64, y: i64) -> Result<()> {
        self.page
            .move_mouse(Point {
                x: x as f64,
                y: y as f64,
            })
            .await?;
        Ok(())
    }

    pub async fn click(&self, x: i64, y: i64, button: Button, count: i64) -> Result<()> {
        let btn = match button {
            Button::Right => MouseButton::Right,
            Button::Middle | Button::Wheel => MouseButton::Middle,
            Button::Back => MouseButton::Back,
            Button::Forward => MouseButton::Forward,
            Button::Left => MouseButton::Left,
        };
        let cmd = DispatchMouseEventParams::builder()
            .x(x as f64)
            .y(y as f64)
            .button(btn)
            .click_count(count);
        self.page
            .move_mouse(Point {
                x: x as f64,
                y: y as f64,
            })
            .await?
            .execute(
                cmd.clone()
                    .r#type(DispatchMouseEventType::MousePressed)
                    .build()
                    .unwrap(),
            )
            .await?;
        self.page
            .execute(
                cmd.r#type(DispatchMouseEventType::MouseReleased)
                    .build()
                    .unwrap(),
            )
            .await?;
        Ok(())
    }

    pub async fn scroll(&self, x: i64, y: i64, dx: i64, dy: i64) -> Result<()> {
        self.page
            .execute(
                DispatchMouseEventParams::builder()
                    .x(x as f64)
                    .y(y as f64)
                    .delta_x(dx as f64)
                    .delta_y(dy as f64)
                    .r#type(DispatchMouseEventType::MouseWheel)
                    .build()
                    .unwrap(),
            )
            .await?;
        Ok(())
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        // Input.insertText feeds the focused element directly.
        self.page
            .execute(InsertTextParams {
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn keypress(&self, keys: &[String]) -> Result<()> {
        let stroke = KeyStroke::from_names(keys);
        let key_json = serde_json::to_string(&stroke.key).map_err(|e| anyhow::anyhow!(e))?;
        let js = format!(
            r#"
            (function() {{
              const el = document.activeElement || document.body;
              const opts = {{
                key: {key}, code: {key}, bubbles: true,
                ctrlKey: {ctrl}, altKey: {alt}, shiftKey: {shift}, metaKey: {meta}
              }};
              el.dispatchEvent(new KeyboardEvent("keydown", opts));
              el.dispatchEvent(new KeyboardEvent("keyup", opts));
            }})()
        "#,
            key = key_json,
            ctrl = stroke.ctrl,
            alt = stroke.alt,
            shift = stroke.shift,
            meta = stroke.meta,
        );
        self.eval(js).await
    }

    pub async fn drag(&self, path: &[ActionPoint]) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        let start = path[0];
        let down = DispatchMouseEventParams::builder()
            .x(start.x as f64)
            .y(start.y as f64)
            .button(MouseButton::Left);
        self.page
            .move_mouse(Point {
                x: start.x as f64,
                y: start.y as f64,
            })
            .await?
            .execute(
                down.clone()
                    .r#type(DispatchMouseEventType::MousePressed)
                    .build()
                    .unwrap(),
            )
            .await?;
        for p in &path[1..] {
            self.page
                .move_mouse(Point {
                    x: p.x as f64,
                    y: p.y as f64,
                })
                .await?;
        }
        self.page
            .execute(
                down.r#type(DispatchMouseEventType::MouseReleased)
                    .build()
                    .unwrap(),
            )
            .await?;
        Ok(())
    }

    pub async fn screenshot_b64(&self) -> Result<String> {
        let take = || async {
            self.page
                .screenshot(
                    ScreenshotParamsBuilder::default()
                        .full_page(false)
                        .omit_background(true)
                        .build(),
                )
                .await
        };
        match take().await {
            Ok(bytes) => Ok(STANDARD.encode(bytes)),
            Err(e) => {
                let msg = format!("{}", e);
                if msg.contains("0 width") || msg.contains("0 height") {
                    // force the viewport and retry once
                    let (w, h) = self.dimensions;
                    let _ = self
                        .page
                        .execute(
                            SetDeviceMetricsOverrideParams::builder()
                                .width(w as i64)
                                .height(h as i64)
                                .device_scale_factor(1.0)
                                .mobile(false)
                                .build()
                                .unwrap(),
                        )
                        .await;
                    sleep(Duration::from_millis(50)).await;
                    let bytes = take().await?;
                    return Ok(STANDARD.encode(bytes));
                }
                Err(anyhow::anyhow!(e))
            }
        }
    }

    pub async fn wait_for_stable(&self) -> Result<()> {
        sleep(Duration::from_millis(400)).await;
        Ok(())
    }
}

/// One DOM keyboard event decoded from a wire key list: modifiers plus the
/// main key.
struct KeyStroke {
    key: String,
    ctrl: bool,
    alt: bool,
    shift: bool,
    meta: bool,
}

impl KeyStroke {
    fn from_names(keys: &[String]) -> Self {
        let mut stroke = Self {
            key: String::new(),
            ctrl: false,
            alt: false,
            shift: false,
            meta: false,
        };
        for k in keys {
            match k.to_uppercase().as_str() {
                "CTRL" | "CONTROL" => stroke.ctrl = true,
                "ALT" | "OPTION" => stroke.alt = true,
                "SHIFT" => stroke.shift = true,
                "META" | "CMD" | "SUPER" | "WIN" => stroke.meta = true,
                other => stroke.key = dom_key_name(other),
            }
        }
        if stroke.key.is_empty() {
            // modifiers alone; report the last one as the key
            stroke.key = keys.last().cloned().unwrap_or_default();
        }
        stroke
    }
}

fn dom_key_name(name: &str) -> String {
    match name {
        "ENTER" | "RETURN" => "Enter".into(),
        "ESC" | "ESCAPE" => "Escape".into(),
        "SPACE" => " ".into(),
        "BACKSPACE" => "Backspace".into(),
        "TAB" => "Tab".into(),
        "DELETE" | "DEL" => "Delete".into(),
        "HOME" => "Home".into(),
        "END" => "End".into(),
        "PAGEUP" => "PageUp".into(),
        "PAGEDOWN" => "PageDown".into(),
        "ARROWLEFT" | "LEFT" => "ArrowLeft".into(),
        "ARROWRIGHT" | "RIGHT" => "ArrowRight".into(),
        "ARROWUP" | "UP" => "ArrowUp".into(),
        "ARROWDOWN" | "DOWN" => "ArrowDown".into(),
        single if single.len() == 1 => single.to_lowercase(),
        other => other.to_string(),
    }
}

/// Map a CDP-layer failure onto the executor taxonomy: a dead devtools
/// channel means the surface is gone, anything else is recoverable.
fn classify(e: anyhow::Error) -> ExecError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("closed")
        || lower.contains("disconnected")
        || lower.contains("channel")
        || lower.contains("connection refused")
    {
        ExecError::BackendUnavailable(msg)
    } else {
        ExecError::Backend(msg)
    }
}

/// Local browser execution surface.
pub struct ChromiumComputer {
    inner: Chromium,
}

impl ChromiumComputer {
    pub async fn launch(cfg: ChromiumConfig) -> Result<Self, ExecError> {
        let inner = Chromium::launch(cfg).await.map_err(classify)?;
        Ok(Self { inner })
    }

    pub async fn connect(ws_url: &str, cfg: ChromiumConfig) -> Result<Self, ExecError> {
        let inner = Chromium::connect(ws_url, cfg).await.map_err(classify)?;
        Ok(Self { inner })
    }

    async fn observe(&self) -> Result<Observation, ExecError> {
        let url = self.inner.url().await.map_err(classify)?;
        let shot = self.inner.screenshot_b64().await.map_err(classify)?;
        Ok(Observation::new(shot, Some(url)))
    }
}

#[async_trait]
impl Computer for ChromiumComputer {
    async fn execute(&self, action: &Action) -> Result<Observation, ExecError> {
        match action {
            Action::Click { x, y, button } => {
                self.inner.click(*x, *y, *button, 1).await.map_err(classify)?;
                self.inner.wait_for_stable().await.map_err(classify)?;
            }
            Action::DoubleClick { x, y } => {
                self.inner
                    .click(*x, *y, Button::Left, 2)
                    .await
                    .map_err(classify)?;
            }
            Action::Scroll {
                x,
                y,
                scroll_x,
                scroll_y,
            } => {
                self.inner
                    .scroll(*x, *y, *scroll_x, *scroll_y)
                    .await
                    .map_err(classify)?;
            }
            Action::Type { text } => {
                self.inner.type_text(text).await.map_err(classify)?;
            }
            Action::Keypress { keys } => {
                self.inner.keypress(keys).await.map_err(classify)?;
            }
            Action::Move { x, y } => {
                self.inner.move_mouse(*x, *y).await.map_err(classify)?;
            }
            Action::Drag { path } => {
                self.inner.drag(path).await.map_err(classify)?;
            }
            Action::Wait { ms } => {
                sleep(Duration::from_millis(*ms)).await;
            }
            Action::Screenshot => {}
            Action::Goto { url } => {
                self.inner.goto(url).await.map_err(classify)?;
                self.inner.wait_for_stable().await.map_err(classify)?;
            }
            Action::Back => {
                self.inner.back().await.map_err(classify)?;
            }
        }
        // actions can spawn tabs; keep everything in ours
        let _ = self.inner.pin_to_single_tab().await;
        self.observe().await
    }

    async fn current_observation(&self) -> Result<Observation, ExecError> {
        self.observe().await
    }

    fn dimensions(&self) -> (u32, u32) {
        self.inner.dimensions()
    }

    fn environment(&self) -> &str {
        "browser"
    }
}
