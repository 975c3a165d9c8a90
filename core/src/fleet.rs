//! Fleet registry: locations, printer membership and the type catalog.
//!
//! The registry is persisted as a single record. It only holds identity and
//! membership; each printer's operational state lives in its own snapshot.
//!
//! Invariants kept by every operation:
//!
//! - a printer belongs to at most one location
//! - a location's default printer is always one of its members
//! - removing a location unassigns its printers, it never deletes them

use crate::catalog::{PrinterType, builtin_type, builtin_types};
use crate::config::SimulationConfig;
use crate::printer::PrinterInstance;
use crate::types::{LocationId, PrinterId, PrinterTypeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fleet registry errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FleetError {
    /// No such location
    #[error("Location not found: {0}")]
    LocationNotFound(LocationId),

    /// No such printer
    #[error("Printer not found: {0}")]
    PrinterNotFound(PrinterId),

    /// No such printer type
    #[error("Printer type not found: {0}")]
    TypeNotFound(PrinterTypeId),

    /// Identifier already taken
    #[error("Duplicate id: {0}")]
    Duplicate(String),

    /// The printer is not a member of the location
    #[error("Printer {printer_id} is not in location {location_id}")]
    NotInLocation {
        /// Printer
        printer_id: PrinterId,
        /// Location
        location_id: LocationId,
    },

    /// Bad input
    #[error("Invalid fleet request: {0}")]
    Invalid(String),
}

/// A place printers are grouped by (room, office, floor).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Identifier
    pub id: LocationId,
    /// Display name
    pub name: String,
    /// Emoji or icon name shown next to the location
    #[serde(default)]
    pub icon: String,
    /// Accent colour, e.g. `#4f46e5`
    #[serde(default)]
    pub color: String,
    /// Members in insertion order; routing falls back in this order
    #[serde(default)]
    pub printer_ids: Vec<PrinterId>,
    /// Preferred printer
    #[serde(default)]
    pub default_printer: Option<PrinterId>,
}

impl Location {
    /// An empty location.
    #[must_use]
    pub fn new(id: LocationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            icon: String::new(),
            color: String::new(),
            printer_ids: Vec::new(),
            default_printer: None,
        }
    }

    /// Same location with an icon.
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    /// Same location with an accent colour.
    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Whether the printer is a member.
    #[must_use]
    pub fn contains(&self, printer_id: &PrinterId) -> bool {
        self.printer_ids.contains(printer_id)
    }

    fn remove_member(&mut self, printer_id: &PrinterId) {
        self.printer_ids.retain(|id| id != printer_id);
        if self.default_printer.as_ref() == Some(printer_id) {
            self.default_printer = None;
        }
    }
}

/// Partial update of a location; absent fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationPatch {
    /// New name
    pub name: Option<String>,
    /// New icon
    pub icon: Option<String>,
    /// New accent colour
    pub color: Option<String>,
}

/// Registry entry for one printer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetMember {
    /// Instance id; the snapshot lives under `printer:{id}`
    pub id: PrinterId,
    /// Display name
    pub name: String,
    /// Template
    pub type_id: PrinterTypeId,
    /// Current location
    #[serde(default)]
    pub location_id: Option<LocationId>,
}

/// The persisted fleet registry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fleet {
    /// Locations in creation order
    #[serde(default)]
    pub locations: Vec<Location>,
    /// Printers in creation order
    #[serde(default)]
    pub printers: Vec<FleetMember>,
    /// User-registered printer types
    #[serde(default)]
    pub custom_types: Vec<PrinterType>,
    /// Storage version this record was loaded at
    #[serde(default)]
    pub version: u64,
}

impl Fleet {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a location.
    #[must_use]
    pub fn location(&self, id: &LocationId) -> Option<&Location> {
        self.locations.iter().find(|l| &l.id == id)
    }

    /// Looks up a printer's registry entry.
    #[must_use]
    pub fn member(&self, id: &PrinterId) -> Option<&FleetMember> {
        self.printers.iter().find(|p| &p.id == id)
    }

    /// All printers in creation order.
    #[must_use]
    pub fn list_printers(&self) -> &[FleetMember] {
        &self.printers
    }

    /// Members of a location, in membership order.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::LocationNotFound`] for an unknown location.
    pub fn printers_in(&self, location_id: &LocationId) -> Result<Vec<&FleetMember>, FleetError> {
        let location = self
            .location(location_id)
            .ok_or_else(|| FleetError::LocationNotFound(location_id.clone()))?;
        Ok(location
            .printer_ids
            .iter()
            .filter_map(|id| self.member(id))
            .collect())
    }

    /// Printers not assigned to any location.
    #[must_use]
    pub fn unassigned_printers(&self) -> Vec<&FleetMember> {
        self.printers
            .iter()
            .filter(|p| p.location_id.is_none())
            .collect()
    }

    /// Resolves a type id against built-in and custom types.
    #[must_use]
    pub fn printer_type(&self, type_id: &PrinterTypeId) -> Option<PrinterType> {
        builtin_type(type_id.as_str()).or_else(|| {
            self.custom_types
                .iter()
                .find(|t| &t.id == type_id)
                .cloned()
        })
    }

    /// Built-in types followed by custom ones.
    pub fn printer_types(&self) -> impl Iterator<Item = &PrinterType> + '_ {
        builtin_types().iter().chain(self.custom_types.iter())
    }

    /// Adds a custom printer type.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Invalid`] for an invalid template and
    /// [`FleetError::Duplicate`] when the id is already taken.
    pub fn register_type(&mut self, printer_type: PrinterType) -> Result<(), FleetError> {
        printer_type.validate().map_err(FleetError::Invalid)?;
        if self.printer_type(&printer_type.id).is_some() {
            return Err(FleetError::Duplicate(printer_type.id.to_string()));
        }
        self.custom_types.push(printer_type);
        Ok(())
    }

    /// Adds a location.
    ///
    /// Members and default listed on the new location must already exist;
    /// they are moved out of whatever location held them.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Duplicate`], [`FleetError::Invalid`] for an
    /// empty name, or [`FleetError::PrinterNotFound`] for unknown members.
    pub fn add_location(&mut self, location: Location) -> Result<(), FleetError> {
        if location.name.trim().is_empty() {
            return Err(FleetError::Invalid("location name is empty".to_string()));
        }
        if self.location(&location.id).is_some() {
            return Err(FleetError::Duplicate(location.id.to_string()));
        }
        if let Some(missing) = location
            .printer_ids
            .iter()
            .find(|id| self.member(id).is_none())
        {
            return Err(FleetError::PrinterNotFound(missing.clone()));
        }
        if let Some(default) = &location.default_printer {
            if !location.contains(default) {
                return Err(FleetError::NotInLocation {
                    printer_id: default.clone(),
                    location_id: location.id.clone(),
                });
            }
        }

        let members = location.printer_ids.clone();
        let id = location.id.clone();
        self.locations.push(Location {
            printer_ids: Vec::new(),
            ..location
        });
        for printer_id in members {
            self.place(&printer_id, &id);
        }
        Ok(())
    }

    /// Changes a location's name, icon or colour.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::LocationNotFound`] or [`FleetError::Invalid`] for
    /// an empty name.
    pub fn update_location(
        &mut self,
        id: &LocationId,
        patch: LocationPatch,
    ) -> Result<&Location, FleetError> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(FleetError::Invalid("location name is empty".to_string()));
        }
        let location = self.location_mut(id)?;
        if let Some(name) = patch.name {
            location.name = name.trim().to_string();
        }
        if let Some(icon) = patch.icon {
            location.icon = icon;
        }
        if let Some(color) = patch.color {
            location.color = color;
        }
        Ok(location)
    }

    /// Removes a location and unassigns its printers.
    ///
    /// Returns the printers that became unassigned.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::LocationNotFound`].
    pub fn remove_location(&mut self, id: &LocationId) -> Result<Vec<PrinterId>, FleetError> {
        let index = self
            .locations
            .iter()
            .position(|l| &l.id == id)
            .ok_or_else(|| FleetError::LocationNotFound(id.clone()))?;
        let removed = self.locations.remove(index);
        for member in &mut self.printers {
            if member.location_id.as_ref() == Some(id) {
                member.location_id = None;
            }
        }
        Ok(removed.printer_ids)
    }

    /// Moves a printer into a location, leaving its previous one.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::PrinterNotFound`] or
    /// [`FleetError::LocationNotFound`].
    pub fn assign_printer(
        &mut self,
        printer_id: &PrinterId,
        location_id: &LocationId,
    ) -> Result<(), FleetError> {
        if self.member(printer_id).is_none() {
            return Err(FleetError::PrinterNotFound(printer_id.clone()));
        }
        if self.location(location_id).is_none() {
            return Err(FleetError::LocationNotFound(location_id.clone()));
        }
        self.place(printer_id, location_id);
        Ok(())
    }

    /// Removes a printer from its location.
    ///
    /// Returns the location it left, if any.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::PrinterNotFound`].
    pub fn unassign_printer(&mut self, printer_id: &PrinterId) -> Result<Option<LocationId>, FleetError> {
        let member = self
            .printers
            .iter_mut()
            .find(|p| &p.id == printer_id)
            .ok_or_else(|| FleetError::PrinterNotFound(printer_id.clone()))?;
        let previous = member.location_id.take();
        for location in &mut self.locations {
            location.remove_member(printer_id);
        }
        Ok(previous)
    }

    /// Makes a member the location's preferred printer.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::LocationNotFound`] or
    /// [`FleetError::NotInLocation`].
    pub fn set_default_printer(
        &mut self,
        location_id: &LocationId,
        printer_id: &PrinterId,
    ) -> Result<(), FleetError> {
        let location = self.location_mut(location_id)?;
        if !location.contains(printer_id) {
            return Err(FleetError::NotInLocation {
                printer_id: printer_id.clone(),
                location_id: location_id.clone(),
            });
        }
        location.default_printer = Some(printer_id.clone());
        Ok(())
    }

    /// Removes the location's preferred printer.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::LocationNotFound`].
    pub fn clear_default_printer(&mut self, location_id: &LocationId) -> Result<(), FleetError> {
        self.location_mut(location_id)?.default_printer = None;
        Ok(())
    }

    /// Registers a new printer and builds its initial snapshot.
    ///
    /// The snapshot starts warming up with every colour full and the tray
    /// filled to `initial_paper_fraction` of capacity.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::TypeNotFound`], [`FleetError::LocationNotFound`],
    /// [`FleetError::Duplicate`] or [`FleetError::Invalid`] for an empty name.
    pub fn add_printer(
        &mut self,
        id: PrinterId,
        name: &str,
        type_id: &PrinterTypeId,
        location_id: Option<&LocationId>,
        config: &SimulationConfig,
        now: DateTime<Utc>,
    ) -> Result<PrinterInstance, FleetError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FleetError::Invalid("printer name is empty".to_string()));
        }
        if self.member(&id).is_some() {
            return Err(FleetError::Duplicate(id.to_string()));
        }
        let hardware = self
            .printer_type(type_id)
            .ok_or_else(|| FleetError::TypeNotFound(type_id.clone()))?;
        if let Some(location_id) = location_id {
            if self.location(location_id).is_none() {
                return Err(FleetError::LocationNotFound(location_id.clone()));
            }
        }

        self.printers.push(FleetMember {
            id: id.clone(),
            name: name.to_string(),
            type_id: type_id.clone(),
            location_id: None,
        });
        if let Some(location_id) = location_id {
            self.place(&id, location_id);
        }

        Ok(PrinterInstance::provision(
            id,
            name,
            &hardware,
            location_id.cloned(),
            config,
            now,
        ))
    }

    /// Changes a printer's display name in the registry.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::PrinterNotFound`] or [`FleetError::Invalid`].
    pub fn rename_printer(&mut self, printer_id: &PrinterId, name: &str) -> Result<(), FleetError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FleetError::Invalid("printer name is empty".to_string()));
        }
        let member = self
            .printers
            .iter_mut()
            .find(|p| &p.id == printer_id)
            .ok_or_else(|| FleetError::PrinterNotFound(printer_id.clone()))?;
        member.name = name.to_string();
        Ok(())
    }

    /// Deletes a printer from the registry, clearing any default it held.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::PrinterNotFound`].
    pub fn remove_printer(&mut self, printer_id: &PrinterId) -> Result<FleetMember, FleetError> {
        let index = self
            .printers
            .iter()
            .position(|p| &p.id == printer_id)
            .ok_or_else(|| FleetError::PrinterNotFound(printer_id.clone()))?;
        for location in &mut self.locations {
            location.remove_member(printer_id);
        }
        Ok(self.printers.remove(index))
    }

    /// Checks the membership invariants of a loaded registry.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), FleetError> {
        for location in &self.locations {
            for printer_id in &location.printer_ids {
                let member = self.member(printer_id).ok_or_else(|| {
                    FleetError::Invalid(format!(
                        "location {} lists unknown printer {printer_id}",
                        location.id
                    ))
                })?;
                if member.location_id.as_ref() != Some(&location.id) {
                    return Err(FleetError::Invalid(format!(
                        "printer {printer_id} is listed in {} but assigned elsewhere",
                        location.id
                    )));
                }
            }
            if let Some(default) = &location.default_printer {
                if !location.contains(default) {
                    return Err(FleetError::Invalid(format!(
                        "default printer {default} of {} is not a member",
                        location.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn location_mut(&mut self, id: &LocationId) -> Result<&mut Location, FleetError> {
        self.locations
            .iter_mut()
            .find(|l| &l.id == id)
            .ok_or_else(|| FleetError::LocationNotFound(id.clone()))
    }

    // Callers have checked both ids exist.
    fn place(&mut self, printer_id: &PrinterId, location_id: &LocationId) {
        for location in &mut self.locations {
            if &location.id != location_id {
                location.remove_member(printer_id);
            } else if !location.contains(printer_id) {
                location.printer_ids.push(printer_id.clone());
            }
        }
        if let Some(member) = self.printers.iter_mut().find(|p| &p.id == printer_id) {
            member.location_id = Some(location_id.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can unwrap
mod tests {
    use super::*;
    use crate::catalog::{Features, InkSystem, PaperSize};
    use crate::ink::InkColor;
    use crate::printer::PrinterStatus;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn fleet() -> Fleet {
        let mut fleet = Fleet::new();
        fleet
            .add_location(Location::new(LocationId::new("home"), "Home"))
            .unwrap();
        fleet
            .add_location(Location::new(LocationId::new("office"), "Office"))
            .unwrap();
        for (id, type_id) in [("a", "inkjet-home"), ("b", "laser-mono")] {
            fleet
                .add_printer(
                    PrinterId::new(id),
                    id,
                    &PrinterTypeId::new(type_id),
                    Some(&LocationId::new("home")),
                    &SimulationConfig::default(),
                    now(),
                )
                .unwrap();
        }
        fleet
    }

    #[test]
    fn added_printer_is_full_and_warming_up() {
        let mut fleet = fleet();
        let printer = fleet
            .add_printer(
                PrinterId::new("c"),
                "Colour",
                &PrinterTypeId::new("laser-color"),
                None,
                &SimulationConfig::default(),
                now(),
            )
            .unwrap();

        assert_eq!(printer.status, PrinterStatus::WarmingUp);
        assert_eq!(printer.paper.count, 200);
        assert!(printer.ink.iter().all(|(_, level)| (level - 100.0).abs() < f64::EPSILON));
        assert_eq!(fleet.unassigned_printers().len(), 1);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut fleet = fleet();
        let err = fleet
            .add_printer(
                PrinterId::new("x"),
                "X",
                &PrinterTypeId::new("dot-matrix"),
                None,
                &SimulationConfig::default(),
                now(),
            )
            .unwrap_err();
        assert_eq!(err, FleetError::TypeNotFound(PrinterTypeId::new("dot-matrix")));
    }

    #[test]
    fn removing_location_unassigns_members() {
        let mut fleet = fleet();
        let unassigned = fleet.remove_location(&LocationId::new("home")).unwrap();

        assert_eq!(unassigned, vec![PrinterId::new("a"), PrinterId::new("b")]);
        assert_eq!(fleet.printers.len(), 2);
        assert!(fleet.printers.iter().all(|p| p.location_id.is_none()));
    }

    #[test]
    fn removing_default_printer_clears_default() {
        let mut fleet = fleet();
        let home = LocationId::new("home");
        fleet.set_default_printer(&home, &PrinterId::new("a")).unwrap();

        fleet.remove_printer(&PrinterId::new("a")).unwrap();
        let location = fleet.location(&home).unwrap();
        assert_eq!(location.default_printer, None);
        assert_eq!(location.printer_ids, vec![PrinterId::new("b")]);
    }

    #[test]
    fn reassigning_moves_membership_and_default() {
        let mut fleet = fleet();
        let home = LocationId::new("home");
        let office = LocationId::new("office");
        fleet.set_default_printer(&home, &PrinterId::new("b")).unwrap();

        fleet.assign_printer(&PrinterId::new("b"), &office).unwrap();
        assert_eq!(fleet.location(&home).unwrap().default_printer, None);
        assert!(fleet.location(&office).unwrap().contains(&PrinterId::new("b")));
        assert_eq!(fleet.member(&PrinterId::new("b")).unwrap().location_id, Some(office));
        assert_eq!(fleet.validate(), Ok(()));
    }

    #[test]
    fn default_must_be_member() {
        let mut fleet = fleet();
        let err = fleet
            .set_default_printer(&LocationId::new("office"), &PrinterId::new("a"))
            .unwrap_err();
        assert!(matches!(err, FleetError::NotInLocation { .. }));
    }

    #[test]
    fn printers_in_follows_membership_order() {
        let fleet = fleet();
        let ids: Vec<&str> = fleet
            .printers_in(&LocationId::new("home"))
            .unwrap()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn custom_types_resolve_alongside_builtins() {
        let mut fleet = fleet();
        let custom = PrinterType {
            id: PrinterTypeId::new("label-maker"),
            brand: "Dymo".to_string(),
            model: "LabelWriter".to_string(),
            ink_system: InkSystem::Toner,
            colors: vec![InkColor::Black],
            paper_capacity: 50,
            ppm_mono: 40,
            ppm_color: 0,
            paper_sizes: vec![PaperSize::Photo4x6],
            features: Features::default(),
        };
        fleet.register_type(custom.clone()).unwrap();

        assert_eq!(fleet.printer_type(&custom.id), Some(custom.clone()));
        assert!(matches!(fleet.register_type(custom), Err(FleetError::Duplicate(_))));
        assert!(fleet.printer_type(&PrinterTypeId::new("laser-mono")).is_some());
    }

    #[test]
    fn update_location_patches_fields() {
        let mut fleet = fleet();
        let patch = LocationPatch {
            name: Some("Den".to_string()),
            icon: Some("house".to_string()),
            color: None,
        };
        let updated = fleet.update_location(&LocationId::new("home"), patch).unwrap();
        assert_eq!(updated.name, "Den");
        assert_eq!(updated.icon, "house");
    }
}
