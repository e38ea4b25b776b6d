/// Screen power state as reported by the OS. "Interactive" is the glossary
/// term: the display is on and usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveStatus {
    Interactive,
    NotInteractive,
    Unknown,
    NotSupported,
}

impl InteractiveStatus {
    /// Treat anything that is not a definite "screen off" as on, so an
    /// Unknown reading never flips the agent into sleep mode.
    pub fn as_screen_on(self) -> bool {
        !matches!(self, InteractiveStatus::NotInteractive)
    }
}

/// OS power-state seam. Polled by the screen watcher and read once per
/// report job, so implementations must be cheap.
pub trait PowerSource: Send + Sync + 'static {
    fn interactive_status(&self) -> InteractiveStatus;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MacOsPowerSource;

impl PowerSource for MacOsPowerSource {
    fn interactive_status(&self) -> InteractiveStatus {
        interactive_status()
    }
}

/// A locked session or a sleeping display both count as non-interactive;
/// the collector only cares whether someone could be looking at the screen.
#[cfg(target_os = "macos")]
pub fn interactive_status() -> InteractiveStatus {
    match (display_asleep(), session_locked()) {
        (Some(true), _) | (_, Some(true)) => InteractiveStatus::NotInteractive,
        (Some(false), _) | (None, Some(false)) => InteractiveStatus::Interactive,
        (None, None) => InteractiveStatus::Unknown,
    }
}

#[cfg(not(target_os = "macos"))]
pub fn interactive_status() -> InteractiveStatus {
    InteractiveStatus::NotSupported
}

#[cfg(target_os = "macos")]
fn display_asleep() -> Option<bool> {
    unsafe {
        let display = CGMainDisplayID();
        Some(CGDisplayIsAsleep(display) != 0)
    }
}

#[cfg(target_os = "macos")]
fn session_locked() -> Option<bool> {
    use core_foundation::base::{CFRelease, CFTypeRef, TCFType};
    use core_foundation::boolean::CFBoolean;
    use core_foundation::dictionary::CFDictionaryRef;
    use core_foundation::string::CFString;

    unsafe {
        let dict: CFDictionaryRef = CGSessionCopyCurrentDictionary();
        if dict.is_null() {
            return None;
        }

        let key = CFString::new("CGSSessionScreenIsLocked");
        let value: *const std::ffi::c_void =
            core_foundation::dictionary::CFDictionaryGetValue(dict, key.as_concrete_TypeRef() as _);

        let locked = if value.is_null() {
            // Key absent means the session is not locked.
            Some(false)
        } else {
            let bool_ref = value as CFTypeRef;
            if CFBoolean::type_id() == core_foundation::base::CFGetTypeID(bool_ref) {
                Some(CFBoolean::wrap_under_get_rule(bool_ref as _).into())
            } else {
                None
            }
        };

        CFRelease(dict as _);
        locked
    }
}

#[cfg(target_os = "macos")]
#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    fn CGSessionCopyCurrentDictionary() -> core_foundation::dictionary::CFDictionaryRef;
}

#[cfg(target_os = "macos")]
#[link(name = "CoreGraphics", kind = "framework")]
unsafe extern "C" {
    fn CGMainDisplayID() -> u32;
    fn CGDisplayIsAsleep(display: u32) -> u32;
}
