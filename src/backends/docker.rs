use crate::action::{Action, MouseButton, Point};
use crate::computer::{Computer, Observation};
use crate::error::ExecError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct DockerConfig {
    /// Name or id of a running container with an X server, xdotool and
    /// ImageMagick inside.
    pub container: String,
    pub display: String,
    pub dimensions: (u32, u32),
}

impl DockerConfig {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            display: ":1".into(),
            dimensions: (1280, 800),
        }
    }
}

/// Containerized desktop execution surface, driven over `docker exec`.
/// A desktop has no navigation helpers; `goto`/`back` are unsupported here.
pub struct DockerComputer {
    cfg: DockerConfig,
}

impl DockerComputer {
    pub fn new(cfg: DockerConfig) -> Self {
        Self { cfg }
    }

    async fn exec(&self, cmd: &str) -> Result<String, ExecError> {
        debug!(container = %self.cfg.container, cmd, "docker exec");
        let out = Command::new("docker")
            .args(["exec", &self.cfg.container, "sh", "-c", cmd])
            .output()
            .await
            .map_err(|e| ExecError::BackendUnavailable(format!("docker exec: {}", e)))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let stderr = stderr.trim();
            if stderr.contains("No such container") || stderr.contains("is not running") {
                return Err(ExecError::BackendUnavailable(stderr.to_string()));
            }
            return Err(ExecError::Backend(format!(
                "command failed: {} ({})",
                cmd, stderr
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    async fn xdotool(&self, args: &str) -> Result<String, ExecError> {
        self.exec(&format!("DISPLAY={} xdotool {}", self.cfg.display, args))
            .await
    }

    async fn screenshot_b64(&self) -> Result<String, ExecError> {
        self.exec(&format!(
            "export DISPLAY={} && import -window root png:- | base64 -w 0",
            self.cfg.display
        ))
        .await
    }

    async fn click_button(&self, x: i64, y: i64, button: u8, repeat: u32) -> Result<(), ExecError> {
        let repeat_arg = if repeat > 1 {
            format!(" --repeat {}", repeat)
        } else {
            String::new()
        };
        self.xdotool(&format!(
            "mousemove {} {} click{} {}",
            x, y, repeat_arg, button
        ))
        .await?;
        Ok(())
    }

    async fn scroll(&self, x: i64, y: i64, scroll_x: i64, scroll_y: i64) -> Result<(), ExecError> {
        self.xdotool(&format!("mousemove {} {}", x, y)).await?;
        // wheel emulation: buttons 4/5 vertical, 6/7 horizontal
        let vertical = if scroll_y < 0 { 4 } else { 5 };
        for _ in 0..scroll_y.unsigned_abs() {
            self.xdotool(&format!("click {}", vertical)).await?;
        }
        let horizontal = if scroll_x < 0 { 6 } else { 7 };
        for _ in 0..scroll_x.unsigned_abs() {
            self.xdotool(&format!("click {}", horizontal)).await?;
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), ExecError> {
        self.xdotool(&format!("type -- '{}'", shell_quote(text))).await?;
        Ok(())
    }

    async fn keypress(&self, keys: &[String]) -> Result<(), ExecError> {
        self.xdotool(&format!("key --delay 500 {}", xdotool_combo(keys)))
            .await?;
        Ok(())
    }

    async fn drag(&self, path: &[Point]) -> Result<(), ExecError> {
        let Some(start) = path.first() else {
            return Ok(());
        };
        self.xdotool(&format!("mousemove {} {} mousedown 1", start.x, start.y))
            .await?;
        for p in &path[1..] {
            self.xdotool(&format!("mousemove {} {}", p.x, p.y)).await?;
        }
        self.xdotool("mouseup 1").await?;
        Ok(())
    }
}

/// Escape for single-quoted shell context: `'` becomes `'\''`.
fn shell_quote(text: &str) -> String {
    text.replace('\'', "'\\''")
}

/// Map wire key names to xdotool keysyms and join the combination.
fn xdotool_combo(keys: &[String]) -> String {
    keys.iter()
        .map(|k| xdotool_key(k))
        .collect::<Vec<_>>()
        .join("+")
}

fn xdotool_key(key: &str) -> String {
    match key.to_uppercase().as_str() {
        "CTRL" | "CONTROL" => "ctrl".into(),
        "ALT" | "OPTION" => "alt".into(),
        "SHIFT" => "shift".into(),
        "META" | "CMD" | "SUPER" | "WIN" => "super".into(),
        "ENTER" | "RETURN" => "Return".into(),
        "ESC" | "ESCAPE" => "Escape".into(),
        "SPACE" => "space".into(),
        "BACKSPACE" => "BackSpace".into(),
        "TAB" => "Tab".into(),
        "DELETE" | "DEL" => "Delete".into(),
        "HOME" => "Home".into(),
        "END" => "End".into(),
        "PAGEUP" => "Page_Up".into(),
        "PAGEDOWN" => "Page_Down".into(),
        "ARROWLEFT" | "LEFT" => "Left".into(),
        "ARROWRIGHT" | "RIGHT" => "Right".into(),
        "ARROWUP" | "UP" => "Up".into(),
        "ARROWDOWN" | "DOWN" => "Down".into(),
        _ => key.to_string(),
    }
}

#[async_trait]
impl Computer for DockerComputer {
    async fn execute(&self, action: &Action) -> Result<Observation, ExecError> {
        match action {
            Action::Click { x, y, button } => {
                let b = match button {
                    MouseButton::Middle | MouseButton::Wheel => 2,
                    MouseButton::Right => 3,
                    MouseButton::Back => 8,
                    MouseButton::Forward => 9,
                    MouseButton::Left => 1,
                };
                self.click_button(*x, *y, b, 1).await?;
            }
            Action::DoubleClick { x, y } => {
                self.click_button(*x, *y, 1, 2).await?;
            }
            Action::Scroll {
                x,
                y,
                scroll_x,
                scroll_y,
            } => {
                self.scroll(*x, *y, *scroll_x, *scroll_y).await?;
            }
            Action::Type { text } => {
                self.type_text(text).await?;
            }
            Action::Keypress { keys } => {
                self.keypress(keys).await?;
            }
            Action::Move { x, y } => {
                self.xdotool(&format!("mousemove {} {}", x, y)).await?;
            }
            Action::Drag { path } => {
                self.drag(path).await?;
            }
            Action::Wait { ms } => {
                sleep(Duration::from_millis(*ms)).await;
            }
            Action::Screenshot => {}
            Action::Goto { .. } => return Err(ExecError::Unsupported("goto")),
            Action::Back => return Err(ExecError::Unsupported("back")),
        }
        let shot = self.screenshot_b64().await?;
        Ok(Observation::new(shot, None))
    }

    async fn current_observation(&self) -> Result<Observation, ExecError> {
        let shot = self.screenshot_b64().await?;
        Ok(Observation::new(shot, None))
    }

    fn dimensions(&self) -> (u32, u32) {
        self.cfg.dimensions
    }

    fn environment(&self) -> &str {
        "linux"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_single_quotes_for_the_shell() {
        assert_eq!(shell_quote("it's here"), "it'\\''s here");
        assert_eq!(shell_quote("plain"), "plain");
    }

    #[test]
    fn maps_wire_keys_to_keysyms() {
        assert_eq!(xdotool_key("ENTER"), "Return");
        assert_eq!(xdotool_key("ARROWDOWN"), "Down");
        assert_eq!(xdotool_key("CTRL"), "ctrl");
        assert_eq!(xdotool_key("a"), "a");
        assert_eq!(xdotool_key("F5"), "F5");
    }

    #[test]
    fn joins_combos_with_plus() {
        assert_eq!(
            xdotool_combo(&["CTRL".into(), "SHIFT".into(), "TAB".into()]),
            "ctrl+shift+Tab"
        );
    }

    #[tokio::test]
    async fn navigation_helpers_are_unsupported() {
        let computer = DockerComputer::new(DockerConfig::new("cua-test"));
        let err = computer
            .execute(&Action::Goto {
                url: "https://example.com".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Unsupported("goto")));
        let err = computer.execute(&Action::Back).await.unwrap_err();
        assert!(matches!(err, ExecError::Unsupported("back")));
    }
}
