use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(Migration001CreatePrincipals)]
    }
}

pub struct Migration001CreatePrincipals;

impl MigrationName for Migration001CreatePrincipals {
    fn name(&self) -> &str {
        "m001_create_principals"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration001CreatePrincipals {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Principals::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Principals::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Principals::Provider)
                            .string_len(50)
                            .not_null()
                            .default("gmail"),
                    )
                    .col(
                        ColumnDef::new(Principals::Email)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Principals::ImapHost)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Principals::ImapPort)
                            .integer()
                            .not_null()
                            .default(993),
                    )
                    .col(ColumnDef::new(Principals::AppPassword).text().not_null())
                    .col(
                        ColumnDef::new(Principals::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Principals::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_principals_email")
                    .table(Principals::Table)
                    .col(Principals::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Principals::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum Principals {
    Table,
    Id,
    Provider,
    Email,
    ImapHost,
    ImapPort,
    AppPassword,
    Active,
    CreatedAt,
}
