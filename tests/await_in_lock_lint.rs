#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! AST lint: no lock guard may be held across `.await` in `src/`.
//!
//! The in-memory ledger, the session book and the resume point sit behind
//! std mutexes that every lifecycle event touches; a guard kept alive over a
//! ledger round trip, an authority call or a settle delay stalls every other
//! event. The queue agent's mutation lock is the one intentional exception.
//!
//! A guard is a `let` binding whose initializer is `.lock()`/`.try_lock()`
//! followed only by `.await`, `?` or poison handling (`unwrap`, `expect`,
//! `unwrap_or_else`). Anything computed from the guard, such as
//! `.lock().unwrap_or_else(..).clone()`, is a plain value.

use std::fs;
use std::path::Path;
use syn::visit::Visit;
use syn::{Expr, ExprAwait, ExprCall, File, Local, Pat};
use walkdir::WalkDir;

/// Agent advance-and-prime is delete, play, sleep, stop against MPD; two
/// advances interleaving those steps would delete the wrong entry.
/// Format: (file suffix, guard name)
const ALLOWLIST: &[(&str, &str)] = &[("agent/mod.rs", "mutation_guard")];

fn is_allowed(file: &str, guard: &str) -> bool {
    ALLOWLIST
        .iter()
        .any(|(suffix, name)| file.ends_with(suffix) && guard == *name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Finding {
    file: String,
    guard: String,
}

struct GuardScan {
    file: String,
    depth: usize,
    /// (guard binding, block depth it was bound at)
    held: Vec<(String, usize)>,
    findings: Vec<Finding>,
}

impl GuardScan {
    fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            depth: 0,
            held: Vec::new(),
            findings: Vec::new(),
        }
    }

    fn scan(file: &str, source: &str) -> Vec<Finding> {
        let syntax: File = syn::parse_file(source).unwrap_or_else(|e| {
            panic!("failed to parse {}: {}", file, e);
        });
        let mut scan = Self::new(file);
        scan.visit_file(&syntax);
        scan.findings
    }
}

/// True if `expr` evaluates to a lock guard
fn yields_guard(expr: &Expr) -> bool {
    match expr {
        Expr::Await(inner) => yields_guard(&inner.base),
        Expr::Try(inner) => yields_guard(&inner.expr),
        Expr::MethodCall(call) => match call.method.to_string().as_str() {
            "lock" | "try_lock" => true,
            "unwrap" | "expect" | "unwrap_or_else" => yields_guard(&call.receiver),
            _ => false,
        },
        _ => false,
    }
}

impl<'ast> Visit<'ast> for GuardScan {
    fn visit_local(&mut self, local: &'ast Local) {
        syn::visit::visit_local(self, local);
        let Some(init) = &local.init else {
            return;
        };
        if !yields_guard(&init.expr) {
            return;
        }
        if let Pat::Ident(binding) = &local.pat {
            self.held.push((binding.ident.to_string(), self.depth));
        }
    }

    fn visit_expr_await(&mut self, await_expr: &'ast ExprAwait) {
        syn::visit::visit_expr_await(self, await_expr);
        // Awaiting the acquisition itself is fine
        if yields_guard(&await_expr.base) {
            return;
        }
        for (guard, _) in &self.held {
            self.findings.push(Finding {
                file: self.file.clone(),
                guard: guard.clone(),
            });
        }
    }

    fn visit_block(&mut self, block: &'ast syn::Block) {
        self.depth += 1;
        syn::visit::visit_block(self, block);
        let depth = self.depth;
        self.held.retain(|(_, bound_at)| *bound_at < depth);
        self.depth -= 1;
    }

    fn visit_expr_call(&mut self, call: &'ast ExprCall) {
        syn::visit::visit_expr_call(self, call);
        let Expr::Path(func) = &*call.func else {
            return;
        };
        if !func.path.is_ident("drop") {
            return;
        }
        if let Some(Expr::Path(arg)) = call.args.first() {
            if let Some(ident) = arg.path.get_ident() {
                let name = ident.to_string();
                self.held.retain(|(guard, _)| *guard != name);
            }
        }
    }
}

fn guards_in(source: &str) -> Vec<String> {
    GuardScan::scan("src/engine/mod.rs", source)
        .into_iter()
        .map(|f| f.guard)
        .collect()
}

#[test]
fn flags_tokio_guard_held_over_settle_delay() {
    let found = guards_in(
        r#"
        impl SyncEngine {
            async fn on_started(&self) {
                let mutation_guard = self.mutation.lock().await;
                tokio::time::sleep(self.prime_delay).await;
            }
        }
        "#,
    );
    assert_eq!(found, vec!["mutation_guard"]);
    assert!(!is_allowed("src/engine/mod.rs", &found[0]));
}

#[test]
fn flags_std_guard_behind_poison_recovery() {
    let found = guards_in(
        r#"
        impl SyncEngine {
            async fn on_idle(&self, token: PlaybackToken) {
                let mut resume = self
                    .resume
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                self.guards.record_advance(&token).await;
            }
        }
        "#,
    );
    assert_eq!(found, vec!["resume"]);
}

#[test]
fn allows_guard_confined_to_block() {
    let found = guards_in(
        r#"
        impl SessionBook {
            async fn refresh(&self) {
                let count = {
                    let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
                    entries.len()
                };
                self.reader.read_stable().await;
            }
        }
        "#,
    );
    assert!(found.is_empty(), "{found:?}");
}

#[test]
fn allows_guard_dropped_before_await() {
    let found = guards_in(
        r#"
        impl InMemoryLedger {
            async fn sweep(&self, key: &str) {
                let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
                entries.remove(key);
                drop(entries);
                self.ledger.get(key).await;
            }
        }
        "#,
    );
    assert!(found.is_empty(), "{found:?}");
}

#[test]
fn values_read_through_a_lock_are_not_guards() {
    let found = guards_in(
        r#"
        impl SyncEngine {
            async fn on_nearly_finished(&self, token: &PlaybackToken) {
                let resume = self.resume.lock().unwrap_or_else(|p| p.into_inner()).clone();
                let state = self.resume_state();
                let snapshot = self.reader.read_stable().await;
                self.advance_once(token, &finishing).await;
            }
        }
        "#,
    );
    assert!(found.is_empty(), "{found:?}");
}

#[test]
fn agent_mutation_guard_is_allowlisted_only_in_agent() {
    assert!(is_allowed("src/agent/mod.rs", "mutation_guard"));
    assert!(!is_allowed("src/engine/mod.rs", "mutation_guard"));
    assert!(!is_allowed("src/agent/mod.rs", "resume"));
}

#[test]
fn agent_advance_holds_only_the_mutation_guard() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/agent/mod.rs");
    let source = fs::read_to_string(&path).unwrap();
    let findings = GuardScan::scan("src/agent/mod.rs", &source);

    assert!(!findings.is_empty(), "advance should hold its mutation lock");
    assert!(findings.iter().all(|f| f.guard == "mutation_guard"));
}

#[test]
fn no_await_while_holding_a_lock_in_src() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");

    let violations: Vec<Finding> = WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .flat_map(|entry| {
            let file = entry.path().display().to_string();
            let source = fs::read_to_string(entry.path()).unwrap();
            GuardScan::scan(&file, &source)
        })
        .filter(|f| !is_allowed(&f.file, &f.guard))
        .collect();

    if !violations.is_empty() {
        let mut message = String::from(
            "\n\n.await while holding a lock guard. Release the guard first, either\n\
             by confining it to a block or with an explicit drop():\n\n",
        );
        for v in &violations {
            message.push_str(&format!("  - {}: guard `{}`\n", v.file, v.guard));
        }
        panic!("{}", message);
    }
}
