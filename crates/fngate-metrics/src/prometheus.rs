//! Prometheus text exposition format.
//!
//! Renders a [`GateSnapshot`] into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::collector::{CallOutcome, Denial, GateSnapshot};

/// Render a gate snapshot into Prometheus text format.
pub fn render_prometheus(snap: &GateSnapshot) -> String {
    let mut out = String::new();

    header(&mut out, "fngate_calls_total", "Calls that reached a sandbox, by result.", "counter");
    for outcome in CallOutcome::ALL {
        let _ = writeln!(
            out,
            "fngate_calls_total{{result=\"{}\"}} {}",
            outcome.label(),
            snap.calls(outcome)
        );
    }

    header(&mut out, "fngate_denied_total", "Calls rejected before dispatch, by reason.", "counter");
    for denial in Denial::ALL {
        let _ = writeln!(
            out,
            "fngate_denied_total{{reason=\"{}\"}} {}",
            denial.label(),
            snap.denials(denial)
        );
    }

    header(&mut out, "fngate_functions_cached", "Functions with a live runtime entry.", "gauge");
    let _ = writeln!(out, "fngate_functions_cached {}", snap.functions_cached);

    header(&mut out, "fngate_scalers_running", "Functions with a running scaling worker.", "gauge");
    let _ = writeln!(out, "fngate_scalers_running {}", snap.scalers_running);

    header(&mut out, "fngate_function_calls_total", "Calls per function.", "counter");
    for f in &snap.functions {
        let _ = writeln!(out, "fngate_function_calls_total{{cookie=\"{}\"}} {}", f.cookie, f.calls);
    }

    header(&mut out, "fngate_function_errors_total", "Failed calls per function.", "counter");
    for f in &snap.functions {
        let _ = writeln!(out, "fngate_function_errors_total{{cookie=\"{}\"}} {}", f.cookie, f.errors);
    }

    header(&mut out, "fngate_function_timeouts_total", "Timed out calls per function.", "counter");
    for f in &snap.functions {
        let _ = writeln!(out, "fngate_function_timeouts_total{{cookie=\"{}\"}} {}", f.cookie, f.timeouts);
    }

    header(&mut out, "fngate_function_latency_p50_ms", "P50 call latency in milliseconds.", "gauge");
    for f in &snap.functions {
        let _ = writeln!(
            out,
            "fngate_function_latency_p50_ms{{cookie=\"{}\"}} {:.2}",
            f.cookie, f.latency_p50_ms
        );
    }

    header(&mut out, "fngate_function_latency_p99_ms", "P99 call latency in milliseconds.", "gauge");
    for f in &snap.functions {
        let _ = writeln!(
            out,
            "fngate_function_latency_p99_ms{{cookie=\"{}\"}} {:.2}",
            f.cookie, f.latency_p99_ms
        );
    }

    out
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}
