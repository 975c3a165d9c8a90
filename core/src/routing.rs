//! Routing and fallback: which printer should take a print request.
//!
//! The location's default printer wins when it is eligible. Otherwise the
//! first eligible member (in membership order) is chosen and the route
//! records why the default was skipped. Substituting a printer the user did
//! not pick is gated behind [`UserSettings::ask_before_switch`].
//!
//! Routing reads reconciled snapshots and never mutates or persists them.

use crate::catalog::PaperSize;
use crate::fleet::Fleet;
use crate::ink::InkColor;
use crate::job::{JobRequest, Quality};
use crate::printer::{ErrorKind, PrinterInstance, PrinterStatus};
use crate::settings::UserSettings;
use crate::types::{LocationId, PrinterId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a printer was passed over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Powered off, or no snapshot exists
    Offline,
    /// Held by the user
    Paused,
    /// Tray empty
    OutOfPaper,
    /// A colour the request needs is empty
    InkDepleted,
    /// Jammed or faulted
    Error,
    /// Printing another job
    Busy,
    /// Still warming up
    WarmingUp,
    /// In sleep mode
    Asleep,
    /// Cannot print this request (colour, photo quality or paper size)
    Unsupported,
    /// The location has no default printer
    NoDefault,
}

impl SkipReason {
    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Paused => "paused",
            Self::OutOfPaper => "out_of_paper",
            Self::InkDepleted => "ink_depleted",
            Self::Error => "error",
            Self::Busy => "busy",
            Self::WarmingUp => "warming_up",
            Self::Asleep => "asleep",
            Self::Unsupported => "unsupported",
            Self::NoDefault => "no_default",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a request needs from a printer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrintNeeds {
    /// Colour output
    pub color: bool,
    /// Specific paper size; must match what the printer has loaded
    pub paper_size: Option<PaperSize>,
    /// Print quality; `None` uses each printer's default
    pub quality: Option<Quality>,
}

impl From<&JobRequest> for PrintNeeds {
    fn from(request: &JobRequest) -> Self {
        Self {
            color: request.color,
            paper_size: request.paper_size,
            quality: request.quality,
        }
    }
}

/// A printer that was passed over.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Skipped {
    /// Printer
    pub printer_id: PrinterId,
    /// Why
    pub reason: SkipReason,
}

/// The chosen printer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Route {
    /// Chosen printer
    pub printer_id: PrinterId,
    /// Its display name
    pub printer_name: String,
    /// Whether it is the location default
    pub was_default: bool,
    /// Why the default was not used
    pub fallback_reason: Option<SkipReason>,
    /// Every printer passed over on the way
    pub skipped: Vec<Skipped>,
}

impl Route {
    /// Whether using this route substitutes a printer the user configured.
    #[must_use]
    pub fn is_substitution(&self) -> bool {
        !self.was_default && !matches!(self.fallback_reason, None | Some(SkipReason::NoDefault))
    }
}

/// Routing failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// No location given and no current location set
    #[error("No location selected")]
    NoLocation,

    /// Unknown location
    #[error("Location not found: {0}")]
    LocationNotFound(LocationId),

    /// The location is empty
    #[error("No printers in location {0}")]
    NoPrintersInLocation(LocationId),

    /// Every member was skipped
    #[error("No printer available in {location_id}: {reason}")]
    NoPrinterAvailable {
        /// Location
        location_id: LocationId,
        /// The default's skip reason, or the first member's without a default
        reason: SkipReason,
        /// Every member and why it was skipped
        skipped: Vec<Skipped>,
    },
}

/// Decision for a print request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum PrintPlan {
    /// Queue on the route's printer
    Submit(Route),
    /// Ask the user before substituting; nothing is queued
    ConfirmationRequired(Route),
}

/// Colours a request draws from this printer.
fn needed_colors(printer: &PrinterInstance, needs: &PrintNeeds) -> SmallVec<[InkColor; 4]> {
    if needs.color {
        printer.ink.colors().collect()
    } else if printer.ink.carries(InkColor::Black) {
        smallvec::smallvec![InkColor::Black]
    } else {
        printer.ink.colors().take(1).collect()
    }
}

/// Checks whether a reconciled printer can take a request right now.
///
/// # Errors
///
/// Returns the [`SkipReason`] when it cannot.
pub fn check_eligibility(printer: &PrinterInstance, needs: &PrintNeeds) -> Result<(), SkipReason> {
    if needs.color && !printer.hardware.is_color() {
        return Err(SkipReason::Unsupported);
    }
    let quality = needs.quality.unwrap_or(printer.settings.default_quality);
    if quality == Quality::Photo && !printer.hardware.features.photo {
        return Err(SkipReason::Unsupported);
    }
    if needs.paper_size.is_some_and(|size| size != printer.paper.size) {
        return Err(SkipReason::Unsupported);
    }

    match printer.status {
        PrinterStatus::Ready => {}
        PrinterStatus::Offline => return Err(SkipReason::Offline),
        PrinterStatus::Paused => return Err(SkipReason::Paused),
        PrinterStatus::WarmingUp => return Err(SkipReason::WarmingUp),
        PrinterStatus::Sleep => return Err(SkipReason::Asleep),
        PrinterStatus::Printing => return Err(SkipReason::Busy),
        PrinterStatus::Error => {
            return Err(if printer.has_error(ErrorKind::OutOfPaper) {
                SkipReason::OutOfPaper
            } else if printer.has_error(ErrorKind::InkDepleted) {
                SkipReason::InkDepleted
            } else {
                SkipReason::Error
            });
        }
    }

    if printer.paper.count == 0 {
        return Err(SkipReason::OutOfPaper);
    }
    if needed_colors(printer, needs)
        .iter()
        .any(|color| printer.ink.is_depleted(*color))
    {
        return Err(SkipReason::InkDepleted);
    }
    Ok(())
}

/// Picks the printer for a request in a location.
///
/// Members without a snapshot count as offline.
///
/// # Errors
///
/// Returns [`RoutingError::LocationNotFound`],
/// [`RoutingError::NoPrintersInLocation`] or
/// [`RoutingError::NoPrinterAvailable`].
pub fn find_best_printer(
    fleet: &Fleet,
    location_id: &LocationId,
    snapshots: &BTreeMap<PrinterId, PrinterInstance>,
    needs: &PrintNeeds,
) -> Result<Route, RoutingError> {
    let location = fleet
        .location(location_id)
        .ok_or_else(|| RoutingError::LocationNotFound(location_id.clone()))?;
    if location.printer_ids.is_empty() {
        return Err(RoutingError::NoPrintersInLocation(location_id.clone()));
    }

    let eligibility = |id: &PrinterId| {
        snapshots
            .get(id)
            .ok_or(SkipReason::Offline)
            .and_then(|printer| check_eligibility(printer, needs).map(|()| printer))
    };

    let mut skipped = Vec::new();
    let fallback_reason = match &location.default_printer {
        Some(default) => match eligibility(default) {
            Ok(printer) => {
                return Ok(Route {
                    printer_id: default.clone(),
                    printer_name: printer.name.clone(),
                    was_default: true,
                    fallback_reason: None,
                    skipped,
                });
            }
            Err(reason) => {
                skipped.push(Skipped {
                    printer_id: default.clone(),
                    reason,
                });
                reason
            }
        },
        None => SkipReason::NoDefault,
    };

    for id in location
        .printer_ids
        .iter()
        .filter(|id| location.default_printer.as_ref() != Some(*id))
    {
        match eligibility(id) {
            Ok(printer) => {
                return Ok(Route {
                    printer_id: id.clone(),
                    printer_name: printer.name.clone(),
                    was_default: false,
                    fallback_reason: Some(fallback_reason),
                    skipped,
                });
            }
            Err(reason) => skipped.push(Skipped {
                printer_id: id.clone(),
                reason,
            }),
        }
    }

    let reason = match fallback_reason {
        SkipReason::NoDefault => skipped.first().map_or(SkipReason::Offline, |s| s.reason),
        reason => reason,
    };
    Err(RoutingError::NoPrinterAvailable {
        location_id: location_id.clone(),
        reason,
        skipped,
    })
}

/// Routes a print request and applies the confirmation gate.
///
/// `location` overrides the user's current location. With
/// `ask_before_switch` set, substituting for an unavailable default returns
/// [`PrintPlan::ConfirmationRequired`] unless `confirmed_fallback` is true.
///
/// # Errors
///
/// Returns [`RoutingError::NoLocation`] or any error of
/// [`find_best_printer`].
pub fn plan_print(
    fleet: &Fleet,
    settings: &UserSettings,
    location: Option<&LocationId>,
    request: &JobRequest,
    snapshots: &BTreeMap<PrinterId, PrinterInstance>,
    confirmed_fallback: bool,
) -> Result<PrintPlan, RoutingError> {
    let location_id = location
        .or(settings.current_location.as_ref())
        .ok_or(RoutingError::NoLocation)?;
    let route = find_best_printer(fleet, location_id, snapshots, &PrintNeeds::from(request))?;

    if route.is_substitution() && settings.ask_before_switch && !confirmed_fallback {
        Ok(PrintPlan::ConfirmationRequired(route))
    } else {
        Ok(PrintPlan::Submit(route))
    }
}
