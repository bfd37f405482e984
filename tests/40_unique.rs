mod common;

use admin_crud::error::EntityError;
use anyhow::Result;
use common::{payload, Fixture};
use serde_json::{json, Value};
use uuid::Uuid;

fn upload(unique_name: &str, user_id: Uuid) -> Value {
    json!({
        "name": "Quarterly report",
        "unique_name": unique_name,
        "file_type": "application/pdf",
        "source": "s3",
        "file_size": 2048,
        "user_id": user_id.to_string(),
    })
}

#[tokio::test]
async fn duplicate_unique_name_is_rejected_and_count_unchanged() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();
    let owner = Uuid::new_v4();

    fx.uploads.create(&mut session, &payload(upload("report-q1", owner))).await?;
    let before = fx.uploads.count(&mut session).await?;

    let err = fx
        .uploads
        .create(&mut session, &payload(upload("report-q1", owner)))
        .await
        .unwrap_err();
    match &err {
        EntityError::UniqueConstraint { table, field } => {
            assert_eq!(table, "upload");
            assert_eq!(field, "unique_name");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_code(), 409);

    assert_eq!(fx.uploads.count(&mut session).await?, before);
    assert_eq!(fx.store.row_count("upload").await, 1);
    Ok(())
}

#[tokio::test]
async fn update_into_a_taken_value_leaves_the_row_untouched() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();

    fx.roles.create(&mut session, &payload(json!({ "role_name": "admin" }))).await?;
    let staff = fx.roles.create(&mut session, &payload(json!({ "role_name": "staff" }))).await?;

    let err = fx
        .roles
        .update(&mut session, staff.key(), &payload(json!({ "role_name": "admin" })))
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::UniqueConstraint { ref field, .. } if field == "role_name"));

    let read = fx.roles.read_by_key(&mut session, staff.key(), false).await?;
    assert_eq!(read.get("role_name"), Some(&json!("staff")));
    Ok(())
}

#[tokio::test]
async fn duplicate_primary_key_is_a_unique_violation() -> Result<()> {
    let fx = Fixture::new()?;
    let mut session = fx.session();
    let id = Uuid::new_v4();

    let user = json!({ "id": id.to_string(), "email": "a@example.com", "hashed_password": "h" });
    fx.users.create(&mut session, &payload(user)).await?;

    let clash = json!({ "id": id.to_string(), "email": "b@example.com", "hashed_password": "h" });
    let err = fx.users.create(&mut session, &payload(clash)).await.unwrap_err();
    assert!(matches!(err, EntityError::UniqueConstraint { ref field, .. } if field == "id"));
    Ok(())
}

#[tokio::test]
async fn concurrent_sessions_commit_independently() -> Result<()> {
    let fx = Fixture::new()?;

    let mut tasks = vec![];
    for i in 0..8 {
        let store = fx.store.clone();
        let roles = fx.roles.clone();
        tasks.push(tokio::spawn(async move {
            let mut session = store.session();
            roles
                .create(&mut session, &payload(json!({ "role_name": format!("worker-{}", i) })))
                .await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let mut session = fx.session();
    assert_eq!(fx.roles.count(&mut session).await?, 8);
    Ok(())
}
