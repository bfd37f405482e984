//! Built-in admin entities: users, roles, profiles and uploads.

use crate::entity::{EntityDescriptor, Registry, RelationshipSpec};
use crate::error::EntityError;
use crate::schema::{Constraint, DefaultValue, FieldRule, FieldType, SchemaDescriptor, SchemaDeriver};
use serde_json::json;

pub const USER: &str = "User";
pub const ROLE: &str = "Role";
pub const USER_PROFILE: &str = "UserProfile";
pub const UPLOAD: &str = "Upload";

fn nullable(name: &str, field_type: FieldType) -> FieldRule {
    FieldRule::optional(name, field_type, DefaultValue::Null)
}

pub fn role_schema() -> Result<SchemaDescriptor, EntityError> {
    SchemaDescriptor::new(
        "RoleBase",
        vec![
            FieldRule::required("role_name", FieldType::String)
                .length(3, 50)
                .unique()
                .title("Role Name"),
            nullable("role_desc", FieldType::String)
                .length(5, 200)
                .title("Role Description"),
            FieldRule::optional("role_id", FieldType::Uuid, DefaultValue::GeneratedUuid).title("Role ID"),
        ],
    )
}

pub fn user_schema() -> Result<SchemaDescriptor, EntityError> {
    SchemaDescriptor::new(
        "User",
        vec![
            FieldRule::required("email", FieldType::Email)
                .constraint(Constraint::MaxLength(320))
                .unique(),
            FieldRule::required("hashed_password", FieldType::String).constraint(Constraint::MaxLength(1024)),
            FieldRule::optional("is_active", FieldType::Boolean, DefaultValue::Value(json!(true))),
            FieldRule::optional("is_superuser", FieldType::Boolean, DefaultValue::Value(json!(false))),
            FieldRule::optional("is_verified", FieldType::Boolean, DefaultValue::Value(json!(false))),
            nullable("role_id", FieldType::Uuid),
        ],
    )
}

pub fn profile_schema() -> Result<SchemaDescriptor, EntityError> {
    SchemaDescriptor::new(
        "ProfileBase",
        vec![
            FieldRule::required("first_name", FieldType::String).length(3, 120).title("First Name"),
            FieldRule::required("last_name", FieldType::String).length(3, 120).title("Last Name"),
            nullable("gender", FieldType::String).length(3, 10).title("Gender"),
            nullable("date_of_birth", FieldType::DateTime).title("Date of Birth"),
            nullable("city", FieldType::String).length(0, 50).title("City"),
            nullable("country", FieldType::String).length(0, 50).title("Country"),
            nullable("address", FieldType::String).length(0, 255).title("Address"),
            nullable("phone", FieldType::String).length(0, 15).title("Phone Number"),
            nullable("company", FieldType::String).length(0, 100).title("Company"),
            nullable("user_id", FieldType::Uuid).title("User ID"),
        ],
    )
}

pub fn upload_schema() -> Result<SchemaDescriptor, EntityError> {
    SchemaDescriptor::new(
        "Upload",
        vec![
            FieldRule::required("name", FieldType::String).constraint(Constraint::MaxLength(250)),
            FieldRule::required("unique_name", FieldType::String)
                .constraint(Constraint::MaxLength(50))
                .unique(),
            FieldRule::required("file_type", FieldType::String),
            FieldRule::required("source", FieldType::String),
            nullable("file_size", FieldType::Integer).constraint(Constraint::Minimum(0.0)),
            FieldRule::required("user_id", FieldType::Uuid),
        ],
    )
}

/// Registry holding the four admin entities, validated
pub fn admin_registry() -> Result<Registry, EntityError> {
    let mut registry = Registry::new();
    registry
        .register(EntityDescriptor::new(ROLE, "role", role_schema()?).with_primary_key("role_id"))?
        .register(
            EntityDescriptor::new(USER, "users", user_schema()?)
                .with_relationship(RelationshipSpec::belongs_to("role", ROLE, "role_id"))
                .with_relationship(RelationshipSpec::has_one("profile", USER_PROFILE, "user_id"))
                .with_relationship(RelationshipSpec::has_many("uploads", UPLOAD, "user_id")),
        )?
        .register(
            EntityDescriptor::new(USER_PROFILE, "user_profile", profile_schema()?)
                .with_relationship(RelationshipSpec::belongs_to("user", USER, "user_id")),
        )?
        .register(
            EntityDescriptor::new(UPLOAD, "upload", upload_schema()?)
                .with_relationship(RelationshipSpec::belongs_to("user", USER, "user_id")),
        )?;
    registry.validate()?;
    Ok(registry)
}

/// Partial schemas the admin views use, derived once at startup
#[derive(Debug, Clone)]
pub struct AdminSchemas {
    pub role_create: SchemaDescriptor,
    pub role_read: SchemaDescriptor,
    pub profile_update: SchemaDescriptor,
}

impl AdminSchemas {
    pub fn derive() -> Result<Self, EntityError> {
        let role = role_schema()?;
        let profile = profile_schema()?;
        Ok(Self {
            role_create: SchemaDeriver::derive_named(&role, "RoleCreate", ["role_id"])?,
            role_read: SchemaDeriver::derive_named(&role, "RoleRead", ["role_name", "role_desc"])?,
            profile_update: SchemaDeriver::derive_named(&profile, "ProfileUpdate", ["user_id"])?,
        })
    }

    pub fn get(&self, name: &str) -> Option<&SchemaDescriptor> {
        self.iter().find(|schema| schema.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaDescriptor> {
        [&self.role_create, &self.role_read, &self.profile_update].into_iter()
    }
}
