//! Conversation summary entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String, // "{student_id}_{alumni_id}"
    pub student_id: String,
    pub student_name: String,
    pub alumni_id: String,
    pub alumni_name: String,
    pub last_message: String,
    pub last_message_time: i64,
    pub last_message_sender: String, // sender id
    pub unread_student: i32,
    pub unread_alumni: i32,
    pub student_read_seq: i64, // last seq acknowledged by the student
    pub alumni_read_seq: i64,  // last seq acknowledged by the alumni
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
