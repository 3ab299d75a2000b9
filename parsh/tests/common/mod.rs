//! A scripted evaluator for scheduler tests: an in-memory filesystem, a
//! tick-ordered execution timeline, and a small command vocabulary.
//!
//! Commands understood (after `$var` expansion):
//! - `sleep MS [tag]` — sleeps `MS` milliseconds.
//! - `echo WORDS..` — writes the joined words to its output redirection.
//! - `cp` — copies its input redirection to its output redirection.
//! - `cat` — records the contents of its input redirection.
//! - `true` / `false` / `status N` — fixed exit statuses.
//! - `test-eq A B` — status 0 iff `A == B`.
//! - `countdown KEY N` — status 0 for the first `N` calls on `KEY`, then 1.

// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use parsh::command::{CommandTree, RedirKind, RedirTarget, Redirect};
use parsh::eval::{Evaluate, Outcome};
use parsh::scheduler::VarAccess;

/// One recorded command execution, bracketed by global ticks.
#[derive(Debug, Clone)]
pub struct Span {
    pub label: String,
    pub start: u64,
    pub end: u64,
}

#[derive(Default)]
struct Inner {
    fs: Mutex<HashMap<String, String>>,
    spans: Mutex<Vec<Span>>,
    reads: Mutex<Vec<(String, String)>>,
    counters: Mutex<HashMap<String, u64>>,
    tick: AtomicU64,
}

/// Shared scripted evaluator; clones observe the same state.
#[derive(Clone, Default)]
pub struct TestEval {
    inner: Arc<Inner>,
}

impl TestEval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_file(&self, name: &str, content: &str) {
        self.inner.fs.lock().unwrap().insert(name.to_string(), content.to_string());
    }

    pub fn file(&self, name: &str) -> Option<String> {
        self.inner.fs.lock().unwrap().get(name).cloned()
    }

    pub fn reads(&self) -> Vec<(String, String)> {
        self.inner.reads.lock().unwrap().clone()
    }

    pub fn spans(&self) -> Vec<Span> {
        self.inner.spans.lock().unwrap().clone()
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.inner.counters.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// The first recorded span whose label equals `label`.
    pub fn span(&self, label: &str) -> Option<Span> {
        self.spans().into_iter().find(|s| s.label == label)
    }

    pub fn spans_with_prefix(&self, prefix: &str) -> Vec<Span> {
        self.spans().into_iter().filter(|s| s.label.starts_with(prefix)).collect()
    }

    /// True when the two labeled executions overlapped in time.
    pub fn overlapped(&self, a: &str, b: &str) -> bool {
        match (self.span(a), self.span(b)) {
            (Some(a), Some(b)) => a.start < b.end && b.start < a.end,
            _ => false,
        }
    }

    fn tick(&self) -> u64 {
        self.inner.tick.fetch_add(1, Ordering::SeqCst)
    }

    fn expand(&self, word: &str, vars: &mut VarAccess<'_>) -> Option<String> {
        let mut out = String::new();
        let mut rest = word;
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if end == 0 {
                out.push('$');
                rest = after;
                continue;
            }
            out.push_str(&vars.lookup(&after[..end])?);
            rest = &after[end..];
        }
        out.push_str(rest);
        Some(out)
    }

    fn redirect_file<'a>(redirects: &'a [Redirect], want_write: bool) -> Option<(&'a str, RedirKind)> {
        redirects.iter().rev().find_map(|r| match &r.target {
            RedirTarget::File(name) if r.kind.writes() == want_write => {
                Some((name.as_str(), r.kind))
            }
            _ => None,
        })
    }

    fn run(
        &self,
        tree: &CommandTree,
        vars: &mut VarAccess<'_>,
        outer: &[Redirect],
    ) -> Option<i32> {
        match tree {
            CommandTree::Background { inner, redirects } => {
                let mut all = outer.to_vec();
                all.extend(redirects.iter().cloned());
                self.run(inner, vars, &all)
            }
            CommandTree::Redir { redirect, next } => {
                let mut all = outer.to_vec();
                all.push(redirect.clone());
                self.run(next, vars, &all)
            }
            CommandTree::Not(inner) => {
                let status = self.run(inner, vars, outer)?;
                Some(i32::from(status == 0))
            }
            CommandTree::VarAssign(inner) => {
                let CommandTree::Simple { assigns, .. } = inner.as_ref() else {
                    return Some(1);
                };
                for (name, raw) in assigns {
                    let value = self.expand(raw, vars)?;
                    vars.publish(name, value);
                }
                Some(0)
            }
            CommandTree::Pipe(parts) => {
                let mut status = 0;
                for part in parts {
                    status = self.run(part, vars, outer)?;
                }
                Some(status)
            }
            CommandTree::Simple { args, redirects, .. } => {
                let mut all = outer.to_vec();
                all.extend(redirects.iter().cloned());
                self.simple(args, &all, vars)
            }
            _ => Some(0),
        }
    }

    fn simple(&self, args: &[String], redirects: &[Redirect], vars: &mut VarAccess<'_>) -> Option<i32> {
        let mut words = Vec::with_capacity(args.len());
        for arg in args {
            words.push(self.expand(arg, vars)?);
        }
        let mut files: Vec<(String, RedirKind)> = Vec::new();
        for r in redirects {
            if let RedirTarget::File(name) = &r.target {
                files.push((self.expand(name, vars)?, r.kind));
            }
        }
        let expanded: Vec<Redirect> =
            files.iter().map(|(name, kind)| Redirect::file(*kind, name.clone())).collect();

        let label = words.join(" ");
        let start = self.tick();
        let status = self.interpret(&words, &expanded);
        let end = self.tick();
        self.inner.spans.lock().unwrap().push(Span { label, start, end });
        Some(status)
    }

    fn interpret(&self, words: &[String], redirects: &[Redirect]) -> i32 {
        let argv0 = words.first().map(String::as_str).unwrap_or("");
        match argv0 {
            "sleep" => {
                let ms: u64 = words.get(1).and_then(|w| w.parse().ok()).unwrap_or(0);
                thread::sleep(Duration::from_millis(ms));
                0
            }
            "echo" => {
                let content = words[1..].join(" ");
                self.write_out(redirects, &content);
                0
            }
            "cp" => {
                let from = Self::redirect_file(redirects, false)
                    .and_then(|(name, _)| self.file(name))
                    .unwrap_or_default();
                self.write_out(redirects, &from);
                0
            }
            "cat" => {
                if let Some((name, _)) = Self::redirect_file(redirects, false) {
                    let content = self.file(name).unwrap_or_default();
                    self.inner.reads.lock().unwrap().push((name.to_string(), content));
                }
                0
            }
            "true" | "" => 0,
            "false" => 1,
            "status" => words.get(1).and_then(|w| w.parse().ok()).unwrap_or(0),
            "test-eq" => {
                let a = words.get(1).map(String::as_str).unwrap_or("");
                let b = words.get(2).map(String::as_str).unwrap_or("");
                i32::from(a != b)
            }
            "countdown" => {
                let key = words.get(1).cloned().unwrap_or_default();
                let limit: u64 = words.get(2).and_then(|w| w.parse().ok()).unwrap_or(0);
                let mut counters = self.inner.counters.lock().unwrap();
                let count = counters.entry(key).or_insert(0);
                if *count < limit {
                    *count += 1;
                    0
                } else {
                    1
                }
            }
            _ => 0,
        }
    }

    fn write_out(&self, redirects: &[Redirect], content: &str) {
        if let Some((name, kind)) = Self::redirect_file(redirects, true) {
            let mut fs = self.inner.fs.lock().unwrap();
            match kind {
                RedirKind::Append => {
                    let entry = fs.entry(name.to_string()).or_default();
                    entry.push_str(content);
                    entry.push('\n');
                }
                _ => {
                    fs.insert(name.to_string(), content.to_string());
                }
            }
        }
    }
}

impl Evaluate for TestEval {
    fn eval(&self, command: &CommandTree, vars: &mut VarAccess<'_>) -> Outcome {
        match self.run(command, vars, &[]) {
            Some(status) => Outcome::Exit(status),
            None => Outcome::Blocked,
        }
    }
}
