//! In-memory [`PageContext`] fake for unit and integration tests.
//!
//! The fake records every script, preload and binding operation, and answers
//! `evaluate` from a list of substring-keyed responders. It also tracks DOM
//! elements created/removed by the media-preparation scripts so tests can
//! assert cleanup.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::page::{PageContext, PageError};

/// Scriptable in-memory page.
#[derive(Default)]
pub struct FakePage {
    closed: AtomicBool,
    close_calls: AtomicUsize,
    bindings: Mutex<Vec<String>>,
    binding_adds: Mutex<Vec<String>>,
    binding_removes: Mutex<Vec<String>>,
    preloads: Mutex<Vec<String>>,
    evaluated: Mutex<Vec<String>>,
    responders: Mutex<Vec<(String, Value)>>,
    /// Binding names that fail with `DuplicateBinding` on their next add.
    duplicate_next: Mutex<Vec<String>>,
    /// Scripts containing any of these substrings fail evaluation.
    evaluate_failures: Mutex<Vec<String>>,
    /// Scripts containing any of these substrings never resolve.
    evaluate_hangs: Mutex<Vec<String>>,
    elements: Mutex<Vec<String>>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any evaluated script containing `needle` with `value`.
    /// Responders are consulted in registration order; first match wins.
    pub fn respond_with(&self, needle: &str, value: Value) {
        self.responders
            .lock()
            .unwrap()
            .push((needle.to_string(), value));
    }

    /// Replace the value of an existing responder (or add one).
    pub fn set_response(&self, needle: &str, value: Value) {
        let mut responders = self.responders.lock().unwrap();
        if let Some(entry) = responders.iter_mut().find(|(n, _)| n == needle) {
            entry.1 = value;
        } else {
            responders.push((needle.to_string(), value));
        }
    }

    /// Make the next `add_binding(name)` fail as a duplicate.
    pub fn fail_next_add_as_duplicate(&self, name: &str) {
        self.duplicate_next.lock().unwrap().push(name.to_string());
    }

    /// Make every evaluated script containing `needle` fail.
    pub fn fail_evaluate_containing(&self, needle: &str) {
        self.evaluate_failures
            .lock()
            .unwrap()
            .push(needle.to_string());
    }

    /// Make every evaluated script containing `needle` hang forever, for
    /// exercising cancellation races. The script is still recorded.
    pub fn hang_evaluate_containing(&self, needle: &str) {
        self.evaluate_hangs.lock().unwrap().push(needle.to_string());
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Simulate a navigation: the page forgets every binding.
    pub fn drop_all_bindings(&self) {
        self.bindings.lock().unwrap().clear();
    }

    /// Remove one binding behind the host's back.
    pub fn drop_binding(&self, name: &str) {
        self.bindings.lock().unwrap().retain(|n| n != name);
    }

    pub fn live_bindings(&self) -> Vec<String> {
        self.bindings.lock().unwrap().clone()
    }

    /// Every `add_binding` call, including failed ones.
    pub fn add_binding_calls(&self) -> Vec<String> {
        self.binding_adds.lock().unwrap().clone()
    }

    pub fn remove_binding_calls(&self) -> Vec<String> {
        self.binding_removes.lock().unwrap().clone()
    }

    pub fn preload_scripts(&self) -> Vec<String> {
        self.preloads.lock().unwrap().clone()
    }

    pub fn evaluated_scripts(&self) -> Vec<String> {
        self.evaluated.lock().unwrap().clone()
    }

    pub fn evaluated_containing(&self, needle: &str) -> usize {
        self.evaluated
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// DOM element ids currently present (tracked from create/remove scripts).
    pub fn element_ids(&self) -> Vec<String> {
        self.elements.lock().unwrap().clone()
    }

    /// Track input elements created and removed by evaluated scripts.
    ///
    /// Creation scripts assign `input.id = '<id>'`; removal scripts call
    /// `getElementById('<id>')` and `.remove()`.
    fn track_elements(&self, script: &str) {
        if script.contains("document.createElement") {
            if let Some(id) = extract_between(script, "input.id = '", "'") {
                let mut elements = self.elements.lock().unwrap();
                if !elements.iter().any(|e| e == &id) {
                    elements.push(id);
                }
            }
        }
        if script.contains(".remove()") {
            if let Some(id) = extract_between(script, "getElementById('", "'") {
                self.elements.lock().unwrap().retain(|e| e != &id);
            }
        }
    }
}

fn extract_between(haystack: &str, start: &str, end: &str) -> Option<String> {
    let from = haystack.find(start)? + start.len();
    let len = haystack[from..].find(end)?;
    Some(haystack[from..from + len].to_string())
}

#[async_trait]
impl PageContext for FakePage {
    async fn evaluate(&self, script: &str) -> Result<Value, PageError> {
        if self.is_closed() {
            return Err(PageError::Closed);
        }
        self.evaluated.lock().unwrap().push(script.to_string());

        let hang = {
            let hangs = self.evaluate_hangs.lock().unwrap();
            hangs.iter().any(|n| script.contains(n.as_str()))
        };
        if hang {
            std::future::pending::<()>().await;
        }

        self.track_elements(script);

        let failures = self.evaluate_failures.lock().unwrap();
        if let Some(needle) = failures.iter().find(|n| script.contains(n.as_str())) {
            return Err(PageError::Evaluation {
                message: format!("scripted failure on '{needle}'"),
            });
        }
        drop(failures);

        let responders = self.responders.lock().unwrap();
        for (needle, value) in responders.iter() {
            if script.contains(needle.as_str()) {
                return Ok(value.clone());
            }
        }
        Ok(Value::Null)
    }

    async fn add_preload_script(&self, source: &str) -> Result<(), PageError> {
        if self.is_closed() {
            return Err(PageError::Closed);
        }
        self.preloads.lock().unwrap().push(source.to_string());
        Ok(())
    }

    async fn add_binding(&self, name: &str) -> Result<(), PageError> {
        if self.is_closed() {
            return Err(PageError::Closed);
        }
        self.binding_adds.lock().unwrap().push(name.to_string());

        let mut duplicates = self.duplicate_next.lock().unwrap();
        if let Some(pos) = duplicates.iter().position(|n| n == name) {
            duplicates.remove(pos);
            return Err(PageError::DuplicateBinding {
                name: name.to_string(),
            });
        }
        drop(duplicates);

        let mut bindings = self.bindings.lock().unwrap();
        if bindings.iter().any(|n| n == name) {
            return Err(PageError::DuplicateBinding {
                name: name.to_string(),
            });
        }
        bindings.push(name.to_string());
        Ok(())
    }

    async fn remove_binding(&self, name: &str) -> Result<(), PageError> {
        if self.is_closed() {
            return Err(PageError::Closed);
        }
        self.binding_removes.lock().unwrap().push(name.to_string());
        let mut bindings = self.bindings.lock().unwrap();
        match bindings.iter().position(|n| n == name) {
            Some(pos) => {
                bindings.remove(pos);
                Ok(())
            }
            None => Err(PageError::Evaluation {
                message: format!("no binding named {name}"),
            }),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), PageError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
