use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Trailing window for the usage query. Short on purpose: a wide window
/// would report an app the user left minutes ago.
pub const DEFAULT_USAGE_WINDOW: Duration = Duration::from_secs(5);

/// OS usage-tracking seam. `most_recent_app` answers "which app was in
/// front within the last `window`", `app_label` turns that identifier into
/// something a human recognizes.
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// `Ok(None)` means nothing was used inside the window; `Err` means the
    /// source itself is unavailable (most commonly a missing permission).
    async fn most_recent_app(&self, window: Duration) -> Result<Option<String>>;

    /// May fail when the app was removed between the usage query and the
    /// label lookup.
    async fn app_label(&self, app_id: &str) -> Result<String>;
}

/// Last successful resolution. The two fields are only ever written
/// together, so the display name always belongs to the stored id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForegroundCache {
    pub last_package_id: Option<String>,
    pub last_display_name: String,
}

/// Best-effort "what app is in front" with a sticky fallback: when the
/// usage source comes up empty (or errors), the previous answer is reused
/// rather than reporting nothing.
pub struct ForegroundResolver {
    source: Arc<dyn UsageSource>,
    window: Duration,
    cache: ForegroundCache,
    degraded: bool,
}

impl ForegroundResolver {
    pub fn new(source: Arc<dyn UsageSource>) -> Self {
        Self::with_window(source, DEFAULT_USAGE_WINDOW)
    }

    pub fn with_window(source: Arc<dyn UsageSource>, window: Duration) -> Self {
        Self {
            source,
            window,
            cache: ForegroundCache::default(),
            degraded: false,
        }
    }

    pub fn cache(&self) -> &ForegroundCache {
        &self.cache
    }

    /// True when the last `resolve` could not reach the usage source at all
    /// (e.g. permission revoked). The label it returned was served from
    /// cache.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Never fails. Empty string only before the first real resolution.
    pub async fn resolve(&mut self) -> String {
        let app_id = match self.source.most_recent_app(self.window).await {
            Ok(Some(app_id)) => {
                self.degraded = false;
                app_id
            }
            Ok(None) => {
                self.degraded = false;
                return self.cache.last_display_name.clone();
            }
            Err(_) => {
                self.degraded = true;
                return self.cache.last_display_name.clone();
            }
        };

        match self.source.app_label(&app_id).await {
            Ok(label) => {
                // Written as a pair: the cache must never hold a label for a
                // different id.
                self.cache = ForegroundCache {
                    last_package_id: Some(app_id),
                    last_display_name: label.clone(),
                };
                label
            }
            Err(_) => self.cache.last_display_name.clone(),
        }
    }
}

/// macOS usage source: asks System Events for the frontmost process. There
/// is no trailing-window history on macOS, so the window argument only
/// gates staleness for sources that have one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacOsUsageSource;

#[async_trait]
impl UsageSource for MacOsUsageSource {
    #[cfg(target_os = "macos")]
    async fn most_recent_app(&self, _window: Duration) -> Result<Option<String>> {
        use anyhow::Context;

        let output = run_osascript(
            r#"
tell application "System Events"
    set frontApp to first application process whose frontmost is true
    set frontBundle to ""
    try
        set frontBundle to bundle identifier of frontApp
    on error
        set frontBundle to name of frontApp
    end try
end tell
return frontBundle
"#,
        )
        .await
        .context("failed to query frontmost app via AppleScript")?;

        let app_id = output.trim();
        if app_id.is_empty() {
            Ok(None)
        } else {
            Ok(Some(app_id.to_string()))
        }
    }

    #[cfg(not(target_os = "macos"))]
    async fn most_recent_app(&self, _window: Duration) -> Result<Option<String>> {
        Err(anyhow!("no usage-tracking source on this platform"))
    }

    #[cfg(target_os = "macos")]
    async fn app_label(&self, app_id: &str) -> Result<String> {
        use anyhow::Context;

        let escaped = app_id.replace('\\', "\\\\").replace('"', "\\\"");
        let script = format!(
            r#"
tell application "System Events"
    set procs to every application process whose bundle identifier is "{escaped}"
    if (count of procs) is 0 then error "no such process"
    return name of item 1 of procs
end tell
"#
        );
        let label = run_osascript(&script)
            .await
            .with_context(|| format!("failed to resolve label for {app_id}"))?;
        if label.is_empty() {
            Err(anyhow!("empty label for {app_id}"))
        } else {
            Ok(label)
        }
    }

    #[cfg(not(target_os = "macos"))]
    async fn app_label(&self, app_id: &str) -> Result<String> {
        Err(anyhow!("cannot resolve label for {app_id} on this platform"))
    }
}

#[cfg(target_os = "macos")]
async fn run_osascript(script: &str) -> Result<String> {
    use anyhow::Context;
    use std::process::Stdio;
    use tokio::process::Command;

    let output = Command::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to spawn osascript")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(anyhow!(
            "osascript failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}
