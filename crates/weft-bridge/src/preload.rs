//! The page-side preload runtime.
//!
//! Installed before any application script runs, so that no event fires into
//! a void: lifecycle callbacks get persistent placeholder functions, and the
//! dispatcher `__weft_emit` queues events until the host signals readiness.
//! The runtime is guarded against double-initialization (a reinjection must
//! not clobber an in-flight queue) and periodically restores placeholders the
//! page's own scripts may have clobbered.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::page::{PageContext, PageError};

/// Lifecycle callbacks that must exist from the first page script onward.
pub const PLACEHOLDER_CALLBACKS: [&str; 5] = [
    "onOfflineProgressUpdateEvent",
    "onAuthAppStateChangedEvent",
    "onAppStateHasSyncedEvent",
    "onLogoutEvent",
    "onQRChangedEvent",
];

/// Placeholder self-check period: order of minutes, not seconds.
const RESTORE_INTERVAL_MS: u64 = 300_000;

/// Render the preload stub for one session.
///
/// Failures installing a placeholder are logged to the page console, never
/// thrown: a missing placeholder must not crash the page's own logic.
pub fn source(client_id: &str) -> String {
    let client_id = serde_json::to_string(client_id).unwrap_or_else(|_| "\"default\"".into());
    let placeholders = serde_json::to_string(&PLACEHOLDER_CALLBACKS).expect("static list");
    format!(
        r#"(() => {{
    if (window.__weft_preload_done) return;
    window.__weft_preload_done = true;
    window.__weft_client_id = {client_id};

    const placeholders = {placeholders};
    const tag = () => '[' + (window.__weft_client_id || 'default') + ']';

    placeholders.forEach((fn) => {{
        if (window[fn]) return;
        try {{
            Object.defineProperty(window, fn, {{
                value: function (...args) {{
                    console.log(tag() + ' placeholder ' + fn + ' called with:', args);
                }},
                writable: true,
                configurable: false,
            }});
        }} catch (err) {{
            console.warn(tag() + ' failed to install placeholder ' + fn + ':', err);
        }}
    }});

    window.__weft_restore_timer = setInterval(() => {{
        placeholders.forEach((fn) => {{
            if (typeof window[fn] !== 'function') {{
                console.warn(tag() + ' ' + fn + ' was lost, restoring placeholder');
                window[fn] = function (...args) {{
                    console.log(tag() + ' restored placeholder ' + fn + ' called with:', args);
                }};
            }}
        }});
    }}, {RESTORE_INTERVAL_MS});

    window.__weft_ready = false;
    window.__weft_q = [];
    window.__weft_emit = (name, args) => {{
        if (!window.__weft_ready) {{
            window.__weft_q.push([name, args || []]);
            return;
        }}
        if (typeof window[name] === 'function') {{
            try {{
                window[name](JSON.stringify(args || []));
            }} catch (err) {{
                console.error(tag() + ' forwarding ' + name + ' failed:', err);
            }}
        }} else {{
            console.warn(tag() + ' no handler exposed for ' + name);
        }}
    }};
}})();
"#
    )
}

/// Script that flips readiness and drains the queue exactly once, FIFO.
///
/// Queued events whose binding vanished are logged, never dropped silently.
pub fn drain_script() -> String {
    r#"(() => {
    const tag = () => '[' + (window.__weft_client_id || 'default') + ']';
    window.__weft_ready = true;
    const queued = window.__weft_q || [];
    window.__weft_q = [];
    queued.forEach(([name, args]) => {
        if (typeof window[name] === 'function') {
            try {
                window[name](JSON.stringify(args || []));
            } catch (err) {
                console.error(tag() + ' draining ' + name + ' failed:', err);
            }
        } else {
            console.warn(tag() + ' dropped queued ' + name + ': no handler exposed');
        }
    });
})();
"#
    .to_string()
}

/// Script run at session teardown: stops the restore timer and resets the
/// runtime so a later session re-enters cleanly.
pub fn teardown_script() -> String {
    r#"(() => {
    if (window.__weft_restore_timer) clearInterval(window.__weft_restore_timer);
    window.__weft_restore_timer = undefined;
    window.__weft_preload_done = false;
    window.__weft_ready = false;
    window.__weft_q = [];
})();
"#
    .to_string()
}

/// Host-side tracker ensuring the preload stub is installed once per page
/// object. The stub itself carries a page-side one-shot guard, so even a
/// double install cannot clobber an in-flight queue.
pub struct Preloader {
    installed: AtomicBool,
}

impl Preloader {
    pub fn new() -> Self {
        Self {
            installed: AtomicBool::new(false),
        }
    }

    /// Install the preload stub if this page object does not carry it yet.
    pub async fn install(&self, page: &dyn PageContext, client_id: &str) -> Result<(), PageError> {
        if self.installed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match page.add_preload_script(&source(client_id)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Allow a retry on the next injection attempt.
                self.installed.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Forget the installation, e.g. when the session gets a fresh page.
    pub fn reset(&self) {
        self.installed.store(false, Ordering::SeqCst);
    }
}

impl Default for Preloader {
    fn default() -> Self {
        Self::new()
    }
}
