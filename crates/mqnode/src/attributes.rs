use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::is_truthy;

/// Observation settings of a tree node.
///
/// The `mute` flag and the last reported value are runtime state of the
/// reporting engine and are never serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ReportAttributes {
    /// Minimum reporting period, in seconds.
    pub pmin: u64,
    /// Maximum reporting period, in seconds.
    pub pmax: u64,
    /// Report when a numeric value rises above this threshold.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gt: Option<f64>,
    /// Report when a numeric value falls below this threshold.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lt: Option<f64>,
    /// Report when a numeric value moves more than this delta.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub step: Option<f64>,
    /// Polling period, in seconds, for values changing outside of writes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pintvl: Option<u64>,
    /// Reporting is disabled.
    pub cancel: bool,
    /// Change-driven reports are suppressed.
    #[serde(skip, default = "muted")]
    pub mute: bool,
    /// The value sent by the last report.
    #[serde(skip)]
    pub last_reported: Option<Value>,
}

const fn muted() -> bool {
    true
}

// Tells an absent key apart from an explicit `null`, which clears the value.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ReportAttributes {
    /// Creates [`ReportAttributes`] with the given default periods.
    ///
    /// Reporting starts disabled and muted.
    #[must_use]
    pub const fn new(pmin: u64, pmax: u64) -> Self {
        Self {
            pmin,
            pmax,
            gt: None,
            lt: None,
            step: None,
            pintvl: None,
            cancel: true,
            mute: true,
            last_reported: None,
        }
    }
}

/// A partial update of [`ReportAttributes`] sent by a manager.
///
/// Only the keys `pmin`, `pmax`, `gt`, `lt`, `step`, `cancel` and `pintvl`
/// are accepted, so deserializing a payload with any other key fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributesPatch {
    /// Minimum reporting period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmin: Option<u64>,
    /// Maximum reporting period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmax: Option<u64>,
    /// Upper threshold, cleared by `null`.
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub gt: Option<Option<f64>>,
    /// Lower threshold, cleared by `null`.
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub lt: Option<Option<f64>>,
    /// Step delta, cleared by `null`.
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub step: Option<Option<f64>>,
    /// Any truthy value cancels reporting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel: Option<Value>,
    /// Polling period, cleared by `null`.
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub pintvl: Option<Option<u64>>,
}

impl AttributesPatch {
    /// Checks whether the patch asks to cancel reporting.
    #[must_use]
    pub fn cancels(&self) -> bool {
        self.cancel.as_ref().is_some_and(is_truthy)
    }

    /// Checks whether the patch modifies a timer period.
    #[must_use]
    pub const fn changes_periods(&self) -> bool {
        self.pmin.is_some() || self.pmax.is_some() || self.pintvl.is_some()
    }

    /// Applies the patch to the given [`ReportAttributes`].
    ///
    /// The `cancel` key is not stored: cancelling is carried out by the
    /// reporting engine, which owns the flag.
    pub fn apply(&self, attributes: &mut ReportAttributes) {
        if let Some(pmin) = self.pmin {
            attributes.pmin = pmin;
        }
        if let Some(pmax) = self.pmax {
            attributes.pmax = pmax;
        }
        if let Some(gt) = self.gt {
            attributes.gt = gt;
        }
        if let Some(lt) = self.lt {
            attributes.lt = lt;
        }
        if let Some(step) = self.step {
            attributes.step = step;
        }
        if let Some(pintvl) = self.pintvl {
            attributes.pintvl = pintvl;
        }
    }
}
