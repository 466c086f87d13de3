use gcbridge_utils::{ClassId, DomainId, FieldId, ManagedObject};

/// The managed runtime as seen by the bridge.
///
/// Field values are raw machine words: handles are stored as their raw value
/// with `0` for null, tags as their integer value and booleans as `0`/`1`.
pub trait ManagedRuntime {
    fn find_class(
        &self,
        domain: DomainId,
        assembly: &str,
        namespace: &str,
        name: &str,
    ) -> Option<ClassId>;

    /// Find an instance or static field declared on `class` or one of its
    /// ancestors.
    fn find_field(&self, class: ClassId, name: &str) -> Option<FieldId>;

    fn class_of(&self, obj: ManagedObject) -> ClassId;

    /// Whether `class` derives from `base`, directly or transitively.
    /// A class is not its own subclass.
    fn is_subclass_of(&self, class: ClassId, base: ClassId) -> bool;

    fn class_name(&self, class: ClassId) -> String;

    fn get_field(&self, obj: ManagedObject, field: FieldId) -> usize;
    fn set_field(&self, obj: ManagedObject, field: FieldId, value: usize);

    fn set_static_field(&self, domain: DomainId, field: FieldId, value: usize);
}
