//! Existence checks for the ids a dive form refers to.
//!
//! Reference kinds are checked against the shared cache, owner tables through
//! the storage collaborator. A dangling id is a field error; a collaborator
//! failure is not, and propagates.

use super::{ValidationErrors, INVALID_SELECTION_MESSAGE};
use crate::context::RequestContext;
use crate::error::EngineError;
use crate::reference::{ReferenceData, ReferenceDataCache, ReferenceKind};
use crate::storage::{RecordTable, Storage};
use crate::validation::forms::DiveForm;

struct ReferenceCheck<'a> {
    ctx: &'a RequestContext,
    reference_ctx: &'a RequestContext,
    errors: ValidationErrors,
}

impl ReferenceCheck<'_> {
    fn fail(&mut self, field: &'static str) {
        self.errors.add_field_error(field, INVALID_SELECTION_MESSAGE);
    }

    fn cached<K: ReferenceKind>(
        &mut self,
        cache: &ReferenceDataCache<K>,
        id: Option<i64>,
        field: &'static str,
    ) -> Result<(), EngineError> {
        if let Some(id) = id.filter(|id| *id > 0) {
            if !cache.exists(self.reference_ctx, id)? {
                self.fail(field);
            }
        }
        Ok(())
    }

    fn cached_all<K: ReferenceKind>(
        &mut self,
        cache: &ReferenceDataCache<K>,
        ids: &[i64],
        field: &'static str,
    ) -> Result<(), EngineError> {
        if !cache.all_exist(self.reference_ctx, ids)? {
            self.fail(field);
        }
        Ok(())
    }

    fn owned(
        &mut self,
        storage: &dyn Storage,
        table: RecordTable,
        id: Option<i64>,
        field: &'static str,
    ) -> Result<(), EngineError> {
        if let Some(id) = id.filter(|id| *id > 0) {
            let exists = storage
                .id_exists(self.ctx, table, id)
                .map_err(|e| e.during("check record exists"))?;
            if !exists {
                self.fail(field);
            }
        }
        Ok(())
    }
}

/// Check every id on `form`, returning one field error per dangling id.
/// Owner tables are queried under `ctx`, reference caches loaded under
/// `reference_ctx`.
pub fn check_dive_references(
    ctx: &RequestContext,
    reference_ctx: &RequestContext,
    form: &DiveForm,
    reference: &ReferenceData,
    storage: &dyn Storage,
) -> Result<ValidationErrors, EngineError> {
    let mut check = ReferenceCheck {
        ctx,
        reference_ctx,
        errors: ValidationErrors::default(),
    };

    check.owned(storage, RecordTable::DiveSites, Some(form.dive_site_id), "dive_site_id")?;
    check.owned(storage, RecordTable::Operators, form.operator_id, "operator_id")?;
    check.owned(storage, RecordTable::Currencies, form.currency_id, "currency_id")?;
    check.owned(storage, RecordTable::Trips, form.trip_id, "trip_id")?;
    check.owned(
        storage,
        RecordTable::Certifications,
        form.certification_id,
        "certification_id",
    )?;
    check.owned(storage, RecordTable::Buddies, form.buddy_id, "buddy_id")?;

    check.cached(&reference.currents, form.current_id, "current_id")?;
    check.cached(&reference.waves, form.waves_id, "waves_id")?;
    check.cached(&reference.buddy_roles, form.buddy_role_id, "buddy_role_id")?;
    check.cached_all(&reference.equipment, &form.equipment_ids, "equipment_ids")?;
    check.cached(
        &reference.tank_configurations,
        Some(form.tank_configuration_id),
        "tank_configuration_id",
    )?;
    check.cached(
        &reference.tank_materials,
        Some(form.tank_material_id),
        "tank_material_id",
    )?;
    check.cached(&reference.gas_mixes, Some(form.gas_mix_id), "gas_mix_id")?;
    check.cached(&reference.entry_points, Some(form.entry_point_id), "entry_point_id")?;
    check.cached_all(&reference.dive_properties, &form.property_ids, "property_ids")?;

    Ok(check.errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::fixtures::seeded_store;
    use crate::validation::forms::fixtures::dive_form;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_known_ids_pass() {
        let store = Arc::new(seeded_store());
        let reference = ReferenceData::new(store.clone());
        let errors = check_dive_references(&ctx(), &ctx(), &dive_form(), &reference, store.as_ref()).unwrap();
        assert!(errors.is_empty(), "{errors}");
    }

    #[test]
    fn test_dangling_ids_are_field_errors() {
        let store = Arc::new(seeded_store());
        let reference = ReferenceData::new(store.clone());
        let form = DiveForm {
            dive_site_id: 999,
            buddy_id: Some(999),
            gas_mix_id: 999,
            equipment_ids: vec![1, 999],
            current_id: Some(0),
            ..dive_form()
        };

        let errors = check_dive_references(&ctx(), &ctx(), &form, &reference, store.as_ref()).unwrap();
        let fields: Vec<_> = errors.field_errors().iter().map(|e| e.field).collect();
        assert_eq!(fields, ["dive_site_id", "buddy_id", "equipment_ids", "gas_mix_id"]);
        assert_eq!(
            errors.message_for("gas_mix_id"),
            Some(INVALID_SELECTION_MESSAGE)
        );
    }

    #[test]
    fn test_collaborator_failure_propagates() {
        let store = Arc::new(seeded_store());
        let reference = ReferenceData::new(store.clone());
        let ctx = ctx();
        ctx.cancel();

        let err = check_dive_references(&ctx, &ctx, &dive_form(), &reference, store.as_ref()).unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
    }
}
