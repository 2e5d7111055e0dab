use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A mailbox searches can run for, with the IMAP login used to reach it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "principals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub provider: String,
    pub email: String,
    pub imap_host: String,
    pub imap_port: i32,
    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text")]
    pub app_password: String,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
