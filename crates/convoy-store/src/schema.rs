//! Column family layout for the convoy database.

/// Column family names.
pub mod cf {
    /// Primary hypervisor records, keyed by hypervisor id.
    pub const HYPERVISORS: &str = "hypervisors";
    /// Name index for hypervisors: `name -> hypervisor_id`.
    pub const HYPERVISORS_BY_NAME: &str = "hypervisors_by_name";
    /// Primary resource records, keyed by resource id.
    pub const RESOURCES: &str = "resources";
    /// Uniqueness/lookup index: `source_hypervisor || id_at_source -> resource_id`.
    pub const RESOURCES_BY_SOURCE: &str = "resources_by_source";
    /// Primary migration records, keyed by migration id.
    pub const MIGRATIONS: &str = "migrations";
    /// Index for listing migrations of a resource: `resource_id || migration_id`.
    pub const MIGRATIONS_BY_RESOURCE: &str = "migrations_by_resource";
    /// Primary service records, keyed by service id.
    pub const SERVICES: &str = "services";
    /// Lookup index: `host \0 binary -> service_id`.
    pub const SERVICES_BY_HOST: &str = "services_by_host";
}

/// All column families that must exist in the database.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::HYPERVISORS,
        cf::HYPERVISORS_BY_NAME,
        cf::RESOURCES,
        cf::RESOURCES_BY_SOURCE,
        cf::MIGRATIONS,
        cf::MIGRATIONS_BY_RESOURCE,
        cf::SERVICES,
        cf::SERVICES_BY_HOST,
    ]
}
