//! Metadata change to table action planning.
//!
//! Planning is side-effect free: the factory reads the metadata it is given
//! and returns the actions, the caller decides whether to enqueue them.

use super::action::{ColumnAction, TableAction};
use super::error::MigrationError;
use super::type_mapper::map_target_columns;
use crate::catalog::{FieldMetadata, ObjectMetadata, TargetColumn};

/// Builds [`TableAction`]s from catalog changes.
pub struct MigrationFactory;

impl MigrationFactory {
    /// Add the columns of a new field.
    pub fn plan_create_field(object: &ObjectMetadata, field: &FieldMetadata) -> TableAction {
        TableAction::alter(
            object.target_table_name.clone(),
            field
                .columns()
                .into_iter()
                .map(|column| ColumnAction::Create { column })
                .collect(),
        )
    }

    /// Diff two versions of a field by sub-field name.
    ///
    /// Unchanged columns produce no action. Type changes are only planned
    /// when they convert without loss.
    pub fn plan_alter_field(
        object: &ObjectMetadata,
        before: &FieldMetadata,
        after: &FieldMetadata,
    ) -> Result<TableAction, MigrationError> {
        let mut actions = Vec::new();

        for next in &after.target_column_map {
            match before.target_column(&next.sub_field) {
                Some(current) => {
                    let from = &current.column;
                    let to = &next.column;
                    if from == to {
                        continue;
                    }
                    if !from.physical_type.converts_losslessly_to(to.physical_type) {
                        return Err(MigrationError::IncompatibleTypeChange {
                            column: from.name.clone(),
                            from_type: from.physical_type,
                            to_type: to.physical_type,
                        });
                    }
                    actions.push(ColumnAction::Alter {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
                None => actions.push(ColumnAction::Create {
                    column: next.column.clone(),
                }),
            }
        }

        for current in &before.target_column_map {
            if after.target_column(&current.sub_field).is_none() {
                actions.push(ColumnAction::Drop {
                    column: current.column.clone(),
                });
            }
        }

        Ok(TableAction::alter(object.target_table_name.clone(), actions))
    }

    /// Drop the columns of a removed field.
    pub fn plan_delete_field(object: &ObjectMetadata, field: &FieldMetadata) -> TableAction {
        TableAction::alter(
            object.target_table_name.clone(),
            field
                .columns()
                .into_iter()
                .map(|column| ColumnAction::Drop { column })
                .collect(),
        )
    }

    /// Create the table of a new object with its initial fields.
    pub fn plan_create_object(
        object: &ObjectMetadata,
        initial_fields: &[FieldMetadata],
    ) -> TableAction {
        TableAction::create(
            object.target_table_name.clone(),
            initial_fields.iter().flat_map(|f| f.columns()).collect(),
        )
    }

    /// Drop the table of a removed object.
    pub fn plan_delete_object(object: &ObjectMetadata) -> TableAction {
        TableAction::drop_table(object.target_table_name.clone())
    }

    /// Compute the target column map of an updated field.
    ///
    /// Sub-fields present before and after keep their physical column name,
    /// so renaming a field never renames its columns.
    pub fn target_columns_for_update(
        before: &FieldMetadata,
        after: &FieldMetadata,
    ) -> Result<Vec<TargetColumn>, MigrationError> {
        let mut columns =
            map_target_columns(&after.name, &after.kind, after.default_value.as_ref())?;
        for target in columns.iter_mut() {
            if let Some(existing) = before.target_column(&target.sub_field) {
                target.column.name = existing.column.name.clone();
            }
        }
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DefaultValue, FieldKind, FieldSpec, ObjectSpec, TenantId};
    use crate::migration::{PhysicalType, TableActionKind};

    fn tenant() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    fn object() -> ObjectMetadata {
        ObjectSpec::new("Opportunity").into_metadata(tenant())
    }

    fn field(object: &ObjectMetadata, spec: FieldSpec) -> FieldMetadata {
        let columns =
            map_target_columns(&spec.name, &spec.kind, spec.default_value.as_ref()).unwrap();
        spec.into_metadata(tenant(), object.id, columns)
    }

    fn updated(before: &FieldMetadata, kind: FieldKind) -> FieldMetadata {
        let mut after = before.clone();
        after.kind = kind;
        after.target_column_map =
            MigrationFactory::target_columns_for_update(before, &after).unwrap();
        after
    }

    #[test]
    fn test_plan_create_field() {
        let object = object();
        let amount = field(&object, FieldSpec::new("amount", FieldKind::Currency));

        let action = MigrationFactory::plan_create_field(&object, &amount);
        assert_eq!(action.table_name, "opportunity");
        assert_eq!(action.kind, TableActionKind::Alter);
        let names: Vec<_> = action.columns.iter().map(|c| c.column_name()).collect();
        assert_eq!(names, vec!["amountMicros", "amountCurrencyCode"]);
        assert!(action
            .columns
            .iter()
            .all(|c| matches!(c, ColumnAction::Create { .. })));
    }

    #[test]
    fn test_plan_delete_field() {
        let object = object();
        let amount = field(&object, FieldSpec::new("amount", FieldKind::Currency));

        let action = MigrationFactory::plan_delete_field(&object, &amount);
        assert_eq!(action.table_name, "opportunity");
        assert_eq!(action.kind, TableActionKind::Alter);
        let dropped: Vec<_> = action
            .columns
            .iter()
            .map(|c| match c {
                ColumnAction::Drop { column } => (column.name.as_str(), column.physical_type),
                other => panic!("expected a dropped column, got {other:?}"),
            })
            .collect();
        assert_eq!(
            dropped,
            vec![
                ("amountMicros", PhysicalType::Integer),
                ("amountCurrencyCode", PhysicalType::Text),
            ]
        );
    }

    #[test]
    fn test_alter_unchanged_is_empty() {
        let object = object();
        let status = field(&object, FieldSpec::new("status", FieldKind::select(["Open"])));
        let after = updated(&status, FieldKind::select(["Open", "Won"]));

        let action = MigrationFactory::plan_alter_field(&object, &status, &after).unwrap();
        assert!(action.is_empty());
    }

    #[test]
    fn test_alter_lossless_type_change() {
        let object = object();
        let active = field(&object, FieldSpec::new("active", FieldKind::Boolean));
        let after = updated(&active, FieldKind::Text);

        let action = MigrationFactory::plan_alter_field(&object, &active, &after).unwrap();
        assert_eq!(action.columns.len(), 1);
        match &action.columns[0] {
            ColumnAction::Alter { from, to } => {
                assert_eq!(from.physical_type, PhysicalType::Boolean);
                assert_eq!(to.physical_type, PhysicalType::Text);
                assert_eq!(to.name, "active");
            }
            other => panic!("expected alter, got {other:?}"),
        }
    }

    #[test]
    fn test_alter_rejects_lossy_type_change() {
        let object = object();
        let note = field(&object, FieldSpec::new("note", FieldKind::Text));
        let after = updated(&note, FieldKind::Number);

        let err = MigrationFactory::plan_alter_field(&object, &note, &after).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::IncompatibleTypeChange {
                from_type: PhysicalType::Text,
                to_type: PhysicalType::Float,
                ..
            }
        ));
    }

    #[test]
    fn test_alter_shape_change_creates_and_drops() {
        let object = object();
        let price = field(&object, FieldSpec::new("price", FieldKind::Number));
        let after = updated(&price, FieldKind::Currency);

        let action = MigrationFactory::plan_alter_field(&object, &price, &after).unwrap();
        let kinds: Vec<_> = action.columns.iter().map(|c| c.rank()).collect();
        assert_eq!(kinds, vec![0, 0, 2]);
        assert_eq!(action.columns[2].column_name(), "price");
    }

    #[test]
    fn test_default_change_alters_column() {
        let object = object();
        let title = field(&object, FieldSpec::new("title", FieldKind::Text));
        let mut after = title.clone();
        after.default_value = Some(DefaultValue::Text("Untitled".into()));
        after.target_column_map =
            MigrationFactory::target_columns_for_update(&title, &after).unwrap();

        let action = MigrationFactory::plan_alter_field(&object, &title, &after).unwrap();
        assert_eq!(action.columns.len(), 1);
        assert!(matches!(action.columns[0], ColumnAction::Alter { .. }));
    }

    #[test]
    fn test_rename_keeps_physical_names() {
        let object = object();
        let amount = field(&object, FieldSpec::new("amount", FieldKind::Currency));
        let mut after = amount.clone();
        after.name = "dealValue".into();
        after.target_column_map =
            MigrationFactory::target_columns_for_update(&amount, &after).unwrap();

        assert_eq!(after.target_column_map, amount.target_column_map);
        let action = MigrationFactory::plan_alter_field(&object, &amount, &after).unwrap();
        assert!(action.is_empty());
    }

    #[test]
    fn test_plan_object_lifecycle() {
        let object = object();
        let name = field(&object, FieldSpec::new("name", FieldKind::Text));

        let create = MigrationFactory::plan_create_object(&object, &[name]);
        assert_eq!(create.kind, TableActionKind::Create);
        assert_eq!(create.columns.len(), 1);

        let drop = MigrationFactory::plan_delete_object(&object);
        assert_eq!(drop.kind, TableActionKind::Drop);
        assert!(drop.columns.is_empty());
    }
}
