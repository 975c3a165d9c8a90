//! Resource model: ink and paper drawn by printing.
//!
//! Consumption is charged one page at a time as the reconciler crosses page
//! boundaries, so a job that runs dry stops at exactly the page where the
//! resource gave out.

use crate::ink::InkColor;
use crate::job::PrintJob;
use crate::printer::PrinterInstance;
use smallvec::SmallVec;

/// Ink draw multiplier when eco mode is on.
pub const ECO_MODE_FACTOR: f64 = 0.75;

/// Resources one page draws.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceDelta {
    /// Percentage points per colour
    pub ink: SmallVec<[(InkColor, f64); 4]>,
    /// Sheets of paper
    pub sheets: u32,
}

/// A resource ran out while charging a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depletion {
    /// No sheets left
    OutOfPaper,
    /// The colour could not cover the page
    InkDepleted(InkColor),
}

/// Per-page draw for `job` on `instance`.
///
/// Mono jobs draw black only; colour jobs draw every colour the printer
/// carries. Higher quality tiers draw more.
#[must_use]
pub fn consume(job: &PrintJob, instance: &PrinterInstance) -> ResourceDelta {
    let mut per_page = job.quality.ink_per_page();
    if instance.settings.eco_mode {
        per_page *= ECO_MODE_FACTOR;
    }

    let ink = if job.color {
        instance.ink.colors().map(|c| (c, per_page)).collect()
    } else if instance.ink.carries(InkColor::Black) {
        smallvec::smallvec![(InkColor::Black, per_page)]
    } else {
        instance.ink.colors().take(1).map(|c| (c, per_page)).collect()
    };

    ResourceDelta { ink, sheets: 1 }
}

/// The [`Depletion`] that [`apply_delta`] would report, without charging
/// anything.
#[must_use]
pub fn shortfall(instance: &PrinterInstance, delta: &ResourceDelta) -> Option<Depletion> {
    if instance.paper.count < delta.sheets {
        return Some(Depletion::OutOfPaper);
    }
    delta
        .ink
        .iter()
        .find(|(color, amount)| !instance.ink.can_draw(*color, *amount))
        .map(|(color, _)| Depletion::InkDepleted(*color))
}

/// Charges one page's delta against the instance.
///
/// Paper is checked first: an empty tray charges nothing. If any colour
/// cannot cover its draw, every short colour floors at zero and nothing else
/// is drawn. On success ink and paper usage are added to the statistics.
///
/// # Errors
///
/// Returns the first [`Depletion`] encountered.
pub fn apply_delta(instance: &mut PrinterInstance, delta: &ResourceDelta) -> Result<(), Depletion> {
    if instance.paper.count < delta.sheets {
        instance.paper.count = 0;
        return Err(Depletion::OutOfPaper);
    }

    let short: SmallVec<[InkColor; 4]> = delta
        .ink
        .iter()
        .filter(|(color, amount)| !instance.ink.can_draw(*color, *amount))
        .map(|(color, _)| *color)
        .collect();

    if let Some(first) = short.first().copied() {
        for color in short {
            let draw = instance.ink.draw(color, f64::INFINITY);
            instance.stats.record_ink(color, draw.drawn);
        }
        return Err(Depletion::InkDepleted(first));
    }

    for (color, amount) in &delta.ink {
        let draw = instance.ink.draw(*color, *amount);
        instance.stats.record_ink(*color, draw.drawn);
    }
    instance.paper.count -= delta.sheets;
    instance.stats.sheets_used += u64::from(delta.sheets);
    Ok(())
}
