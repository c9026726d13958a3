pub use sea_orm_migration::prelude::*;

mod m20261018_000001_add_oauth2_registry;
mod m20261018_000002_add_user_tables;
mod m20261018_000003_add_oauth2_grants;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261018_000001_add_oauth2_registry::Migration),
            Box::new(m20261018_000002_add_user_tables::Migration),
            Box::new(m20261018_000003_add_oauth2_grants::Migration),
        ]
    }
}
