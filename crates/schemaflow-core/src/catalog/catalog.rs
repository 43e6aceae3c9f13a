//! Read access to object and field metadata.

use super::{FieldMetadata, ObjectMetadata, TenantId};
use crate::error::Error;
use crate::migration::MigrationError;
use crate::storage::key::{
    decode_id, field_name_key, id_key, object_name_key, tag, tenant_prefix, Id,
};
use heck::ToLowerCamelCase;
use sled::Tree;

/// Catalog reader over the object and field trees.
///
/// Writes go through [`MetadataTx`](crate::storage::MetadataTx) so they can be
/// paired with a migration.
#[derive(Clone)]
pub struct MetadataCatalog {
    objects: Tree,
    fields: Tree,
}

impl MetadataCatalog {
    pub(crate) fn new(objects: Tree, fields: Tree) -> Self {
        Self { objects, fields }
    }

    /// Get an object by id.
    pub fn get_object(
        &self,
        tenant: &TenantId,
        id: &Id,
    ) -> Result<Option<ObjectMetadata>, MigrationError> {
        match self.objects.get(id_key(tag::OBJECT, tenant, id))? {
            Some(bytes) => Ok(Some(ObjectMetadata::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Find an object by its singular name.
    ///
    /// Lookup goes through the derived table name, so `SalesLead` and
    /// `salesLead` find the same object.
    pub fn find_object_by_name(
        &self,
        tenant: &TenantId,
        name: &str,
    ) -> Result<Option<ObjectMetadata>, MigrationError> {
        match self
            .objects
            .get(object_name_key(tenant, &name.to_lower_camel_case()))?
        {
            Some(bytes) => {
                let id = decode_id(&bytes).ok_or(Error::InvalidKey)?;
                self.get_object(tenant, &id)
            }
            None => Ok(None),
        }
    }

    /// All objects of a tenant, ordered by name.
    pub fn list_objects(&self, tenant: &TenantId) -> Result<Vec<ObjectMetadata>, MigrationError> {
        let mut objects = Vec::new();
        for item in self.objects.scan_prefix(tenant_prefix(tag::OBJECT, tenant)) {
            let (_, bytes) = item?;
            objects.push(ObjectMetadata::from_bytes(&bytes)?);
        }
        objects.sort_by(|a, b| a.name_singular.cmp(&b.name_singular));
        Ok(objects)
    }

    /// Get a field by id.
    pub fn get_field(
        &self,
        tenant: &TenantId,
        id: &Id,
    ) -> Result<Option<FieldMetadata>, MigrationError> {
        match self.fields.get(id_key(tag::FIELD, tenant, id))? {
            Some(bytes) => Ok(Some(FieldMetadata::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Find a field of an object by name, ignoring ASCII case.
    pub fn find_field_by_name(
        &self,
        tenant: &TenantId,
        object_id: &Id,
        name: &str,
    ) -> Result<Option<FieldMetadata>, MigrationError> {
        match self.fields.get(field_name_key(tenant, object_id, name))? {
            Some(bytes) => {
                let id = decode_id(&bytes).ok_or(Error::InvalidKey)?;
                self.get_field(tenant, &id)
            }
            None => Ok(None),
        }
    }

    /// All fields of an object, in creation order.
    pub fn list_fields(
        &self,
        tenant: &TenantId,
        object_id: &Id,
    ) -> Result<Vec<FieldMetadata>, MigrationError> {
        let mut fields = Vec::new();
        for item in self.fields.scan_prefix(tenant_prefix(tag::FIELD, tenant)) {
            let (_, bytes) = item?;
            let field = FieldMetadata::from_bytes(&bytes)?;
            if &field.object_id == object_id {
                fields.push(field);
            }
        }
        fields.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{FieldKind, FieldSpec, ObjectSpec, TenantId};
    use crate::storage::MetadataStore;

    #[test]
    fn test_catalog_is_tenant_scoped() {
        let store = MetadataStore::temporary().unwrap();
        let acme = TenantId::new("acme").unwrap();
        let globex = TenantId::new("globex").unwrap();

        let deal = ObjectSpec::new("Deal").into_metadata(acme.clone());
        let company = ObjectSpec::new("Company").into_metadata(acme.clone());
        let other = ObjectSpec::new("Deal").into_metadata(globex.clone());
        store
            .transact(|tx| {
                tx.insert_object(&deal)?;
                tx.insert_object(&company)?;
                tx.insert_object(&other)
            })
            .unwrap();

        let catalog = store.catalog();
        let names: Vec<_> = catalog
            .list_objects(&acme)
            .unwrap()
            .into_iter()
            .map(|o| o.name_singular)
            .collect();
        assert_eq!(names, vec!["Company", "Deal"]);
        assert_eq!(catalog.list_objects(&globex).unwrap().len(), 1);
        assert_eq!(
            catalog.find_object_by_name(&globex, "Deal").unwrap().map(|o| o.id),
            Some(other.id)
        );
        assert!(catalog.get_object(&globex, &deal.id).unwrap().is_none());
    }

    #[test]
    fn test_list_fields_filters_by_object() {
        let store = MetadataStore::temporary().unwrap();
        let acme = TenantId::new("acme").unwrap();
        let deal = ObjectSpec::new("Deal").into_metadata(acme.clone());
        let company = ObjectSpec::new("Company").into_metadata(acme.clone());
        let amount = FieldSpec::new("amount", FieldKind::Currency).into_metadata(
            acme.clone(),
            deal.id,
            vec![],
        );
        let name =
            FieldSpec::new("name", FieldKind::Text).into_metadata(acme.clone(), company.id, vec![]);

        store
            .transact(|tx| {
                tx.insert_object(&deal)?;
                tx.insert_object(&company)?;
                tx.insert_field(&deal, &amount)?;
                tx.insert_field(&company, &name)
            })
            .unwrap();

        let catalog = store.catalog();
        let fields = catalog.list_fields(&acme, &deal.id).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "amount");
        assert_eq!(
            catalog.get_field(&acme, &name.id).unwrap().map(|f| f.object_id),
            Some(company.id)
        );
    }
}
