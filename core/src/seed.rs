//! Default fleet created on first run.

use crate::config::SimulationConfig;
use crate::fleet::{Fleet, FleetMember, Location};
use crate::printer::PrinterInstance;
use crate::settings::UserSettings;
use crate::types::{LocationId, PrinterId, PrinterTypeId};
use chrono::{DateTime, Utc};

/// Everything persisted on first run.
#[derive(Clone, Debug, PartialEq)]
pub struct SeedData {
    /// Registry
    pub fleet: Fleet,
    /// One snapshot per registered printer, ready to print
    pub printers: Vec<PrinterInstance>,
    /// User settings pointing at the first location
    pub settings: UserSettings,
}

struct SeedPrinter {
    id: &'static str,
    name: &'static str,
    type_id: &'static str,
    location: &'static str,
}

const LOCATIONS: [(&str, &str, &str, &str); 2] = [
    ("home-office", "Home Office", "house", "#10b981"),
    ("main-office", "Main Office", "building", "#6366f1"),
];

const PRINTERS: [SeedPrinter; 4] = [
    SeedPrinter {
        id: "home-inkjet",
        name: "Home Inkjet",
        type_id: "inkjet-home",
        location: "home-office",
    },
    SeedPrinter {
        id: "home-laser",
        name: "Home Laser",
        type_id: "laser-mono",
        location: "home-office",
    },
    SeedPrinter {
        id: "office-color-laser",
        name: "Office Color Laser",
        type_id: "laser-color",
        location: "main-office",
    },
    SeedPrinter {
        id: "office-ecotank",
        name: "Office EcoTank",
        type_id: "ecotank-office",
        location: "main-office",
    },
];

/// Builds the default fleet: two locations with two printers each.
///
/// The first printer of each location is its default. Seed printers skip
/// warm-up and start `ready`.
#[must_use]
pub fn default_fleet(config: &SimulationConfig, now: DateTime<Utc>) -> SeedData {
    let mut fleet = Fleet::new();
    for (id, name, icon, color) in LOCATIONS {
        fleet.locations.push(
            Location::new(LocationId::new(id), name)
                .with_icon(icon)
                .with_color(color),
        );
    }

    let mut printers = Vec::with_capacity(PRINTERS.len());
    for seed in &PRINTERS {
        let type_id = PrinterTypeId::new(seed.type_id);
        let location_id = LocationId::new(seed.location);
        let Some(hardware) = fleet.printer_type(&type_id) else {
            continue;
        };
        let id = PrinterId::new(seed.id);

        fleet.printers.push(FleetMember {
            id: id.clone(),
            name: seed.name.to_string(),
            type_id,
            location_id: Some(location_id.clone()),
        });
        if let Some(location) = fleet.locations.iter_mut().find(|l| l.id == location_id) {
            location.printer_ids.push(id.clone());
            location.default_printer.get_or_insert_with(|| id.clone());
        }
        printers.push(PrinterInstance::seeded(
            id,
            seed.name,
            &hardware,
            Some(location_id),
            config,
            now,
        ));
    }

    let settings = UserSettings {
        current_location: fleet.locations.first().map(|l| l.id.clone()),
        ..UserSettings::default()
    };

    SeedData {
        fleet,
        printers,
        settings,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can unwrap
mod tests {
    use super::*;
    use crate::printer::PrinterStatus;
    use chrono::TimeZone;

    #[test]
    fn seed_fleet_is_consistent() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let seed = default_fleet(&SimulationConfig::default(), now);

        assert_eq!(seed.fleet.validate(), Ok(()));
        assert_eq!(seed.fleet.locations.len(), 2);
        assert_eq!(seed.printers.len(), 4);
        assert!(seed.printers.iter().all(|p| p.status == PrinterStatus::Ready));

        let home = seed.fleet.location(&LocationId::new("home-office")).unwrap();
        assert_eq!(home.default_printer, Some(PrinterId::new("home-inkjet")));
        assert_eq!(seed.settings.current_location, Some(home.id.clone()));
        assert!(seed.settings.ask_before_switch);
    }
}
