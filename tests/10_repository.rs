mod common;

use std::collections::HashSet;

use admin_crud::config::CONFIG;
use admin_crud::error::EntityError;
use anyhow::Result;
use common::{payload, Fixture};
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn create_then_read_returns_equal_entity() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    let created = fx
        .roles
        .create(&mut session, &payload(json!({ "role_name": "editor", "role_desc": "Can edit pages" })))
        .await?;
    assert!(!created.key().is_nil());

    let read = fx.roles.read_by_key(&mut session, created.key(), false).await?;
    assert_eq!(read, created);

    let other = fx
        .roles
        .create(&mut session, &payload(json!({ "role_name": "viewer" })))
        .await?;
    assert_ne!(other.key(), created.key());
    Ok(())
}

#[tokio::test]
async fn create_applies_defaults_and_accepts_supplied_key() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();
    let id = Uuid::new_v4();

    let user = fx
        .users
        .create(
            &mut session,
            &payload(json!({ "id": id.to_string(), "email": "ada@example.com", "hashed_password": "x" })),
        )
        .await?;

    assert_eq!(user.key(), id);
    assert_eq!(user.get("is_active"), Some(&json!(true)));
    assert_eq!(user.get("is_superuser"), Some(&json!(false)));
    assert_eq!(user.get("role_id"), Some(&Value::Null));
    Ok(())
}

#[tokio::test]
async fn create_reports_missing_and_invalid_fields() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    let err = fx
        .roles
        .create(&mut session, &payload(json!({ "role_desc": "no" })))
        .await
        .unwrap_err();
    match err {
        EntityError::Validation { field_errors, .. } => {
            assert!(field_errors.contains_key("role_name"));
            assert!(field_errors.contains_key("role_desc"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(fx.roles.count(&mut session).await?, 0);
    Ok(())
}

#[tokio::test]
async fn update_applies_exactly_the_given_fields() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    let user = fx
        .users
        .create(&mut session, &payload(json!({ "email": "bob@example.com", "hashed_password": "h1" })))
        .await?;

    let mut changes = payload(json!({ "is_verified": true }));
    changes.unset("email");
    let updated = fx.users.update(&mut session, user.key(), &changes).await?;

    let read = fx.users.read_by_key(&mut session, user.key(), false).await?;
    assert_eq!(read, updated);
    assert_eq!(read.get("is_verified"), Some(&json!(true)));
    for field in ["email", "hashed_password", "is_active", "is_superuser", "role_id"] {
        assert_eq!(read.get(field), user.get(field), "field {} changed", field);
    }
    Ok(())
}

#[tokio::test]
async fn update_can_clear_optional_fields() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    let role = fx
        .roles
        .create(&mut session, &payload(json!({ "role_name": "auditor", "role_desc": "Reads logs" })))
        .await?;
    let updated = fx
        .roles
        .update(&mut session, role.key(), &payload(json!({ "role_desc": null })))
        .await?;
    assert_eq!(updated.get("role_desc"), Some(&Value::Null));
    assert_eq!(updated.get("role_name"), Some(&json!("auditor")));
    Ok(())
}

#[tokio::test]
async fn update_validates_and_reports_missing_rows() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    let role = fx.roles.create(&mut session, &payload(json!({ "role_name": "ops" }))).await?;

    let err = fx
        .roles
        .update(&mut session, role.key(), &payload(json!({ "role_name": "x" })))
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::Validation { .. }));

    let err = fx
        .roles
        .update(&mut session, role.key(), &payload(json!({ "colour": "red" })))
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::Validation { .. }));

    let err = fx
        .roles
        .update(&mut session, Uuid::new_v4(), &payload(json!({ "role_name": "ghost" })))
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::NotFound { .. }));
    assert_eq!(err.status_code(), 404);

    let unchanged = fx.roles.read_by_key(&mut session, role.key(), false).await?;
    assert_eq!(unchanged, role);
    Ok(())
}

#[tokio::test]
async fn read_all_pages_partition_every_row() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    let mut created = HashSet::new();
    for i in 0..7 {
        let role = fx
            .roles
            .create(&mut session, &payload(json!({ "role_name": format!("role-{}", i) })))
            .await?;
        created.insert(role.key());
    }

    let limit = 3;
    let mut seen = Vec::new();
    let mut skip = 0;
    loop {
        let page = fx.roles.read_all(&mut session, skip, limit, false).await?;
        assert!(page.len() as u64 <= limit);
        if page.is_empty() {
            break;
        }
        seen.extend(page.iter().map(|r| r.key()));
        skip += limit;
    }

    assert_eq!(seen.len(), created.len());
    assert_eq!(seen.iter().copied().collect::<HashSet<_>>(), created);

    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted, "pages must follow primary-key order");
    Ok(())
}

#[tokio::test]
async fn read_all_rejects_limits_above_the_maximum() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();
    let Some(max) = CONFIG.repository.max_limit else {
        return Ok(());
    };

    for i in 0..3 {
        fx.roles
            .create(&mut session, &payload(json!({ "role_name": format!("paged-{}", i) })))
            .await?;
    }

    let err = fx.roles.read_all(&mut session, 0, max + 1, false).await.unwrap_err();
    match err {
        EntityError::Validation { field_errors, .. } => assert!(field_errors.contains_key("limit")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!session.in_transaction());

    // a page at the maximum is served in full
    let page = fx.roles.read_all(&mut session, 0, max, false).await?;
    assert_eq!(page.len() as u64, max.min(3));
    Ok(())
}

#[tokio::test]
async fn read_all_on_empty_table_and_zero_limit() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    assert!(fx.uploads.read_all(&mut session, 0, 10, true).await?.is_empty());

    fx.roles.create(&mut session, &payload(json!({ "role_name": "solo" }))).await?;
    assert!(fx.roles.read_all(&mut session, 0, 0, false).await?.is_empty());
    assert!(fx.roles.read_all(&mut session, 5, 10, false).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_then_read_is_not_found() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    let role = fx.roles.create(&mut session, &payload(json!({ "role_name": "temp" }))).await?;
    fx.roles.delete(&mut session, role.key()).await?;

    let err = fx.roles.read_by_key(&mut session, role.key(), false).await.unwrap_err();
    assert!(matches!(err, EntityError::NotFound { .. }));

    let err = fx.roles.delete(&mut session, role.key()).await.unwrap_err();
    assert!(matches!(err, EntityError::NotFound { .. }));
    assert_eq!(fx.roles.count(&mut session).await?, 0);
    Ok(())
}

#[tokio::test]
async fn entities_serialize_flat_for_views() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    let role = fx.roles.create(&mut session, &payload(json!({ "role_name": "admin" }))).await?;
    let json = serde_json::to_value(&role)?;
    assert_eq!(json["role_id"], role.key().to_string());
    assert_eq!(json["role_name"], "admin");
    Ok(())
}
