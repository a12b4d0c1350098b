//! Comparison of client layout against the shadow layout.
//!
//! Structure must match exactly: both sides report the same components.
//! Geometry matches when every coordinate is within `epsilon`.

use serde::Serialize;
use weft_types::{ComponentId, LayoutMap, LayoutRecord};

/// Tolerance used when the caller has no better value.
pub const DEFAULT_EPSILON: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    /// The shadow layout has the component, the client does not.
    MissingOnClient { component: ComponentId },
    /// The client reported a component the server does not know.
    UnknownToServer { component: ComponentId },
    Geometry {
        component: ComponentId,
        field: &'static str,
        client: f64,
        shadow: f64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayoutReport {
    pub compared: usize,
    pub divergences: Vec<Divergence>,
}

impl LayoutReport {
    pub fn is_consistent(&self) -> bool {
        self.divergences.is_empty()
    }
}

pub fn compare(client: &LayoutMap, shadow: &LayoutMap, epsilon: f64) -> LayoutReport {
    let mut report = LayoutReport::default();
    for (id, expected) in shadow {
        match client.get(id) {
            Some(actual) => {
                report.compared += 1;
                compare_record(*id, actual, expected, epsilon, &mut report.divergences);
            }
            None => report
                .divergences
                .push(Divergence::MissingOnClient { component: *id }),
        }
    }
    for id in client.keys().filter(|id| !shadow.contains_key(id)) {
        report
            .divergences
            .push(Divergence::UnknownToServer { component: *id });
    }
    if !report.is_consistent() {
        tracing::debug!(
            divergences = report.divergences.len(),
            compared = report.compared,
            "client layout diverges from shadow layout"
        );
    }
    report
}

fn compare_record(
    component: ComponentId,
    client: &LayoutRecord,
    shadow: &LayoutRecord,
    epsilon: f64,
    out: &mut Vec<Divergence>,
) {
    let fields = [
        ("natural.width", client.natural.width, shadow.natural.width),
        ("natural.height", client.natural.height, shadow.natural.height),
        ("allocated.width", client.allocated.width, shadow.allocated.width),
        ("allocated.height", client.allocated.height, shadow.allocated.height),
        ("position.x", client.position.x, shadow.position.x),
        ("position.y", client.position.y, shadow.position.y),
    ];
    for (field, client, shadow) in fields {
        if (client - shadow).abs() > epsilon || client.is_nan() != shadow.is_nan() {
            out.push(Divergence::Geometry {
                component,
                field,
                client,
                shadow,
            });
        }
    }
}
