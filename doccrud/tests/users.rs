mod common;

use common::Fixture;
use doccrud::{
    entities::{Upload, UserPost, UserPut, password::verify_password},
    prelude::*,
};

fn post(name: &str, email: &str) -> UserPost {
    UserPost {
        name: name.to_string(),
        email: email.to_string(),
        password: "hunter22".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    fixture.user("alice", false).await?;

    let result = crud::create(&fixture.users, &fixture.ctx, post("alicia", "ALICE@example.com")).await;

    assert!(matches!(result, Err(CrudError::Conflict(_))));
    assert_eq!(fixture.count("users").await?, 1);
    Ok(())
}

#[tokio::test]
async fn renaming_onto_a_taken_name_is_a_conflict() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    fixture.user("alice", false).await?;
    let (bob, bob_actor) = fixture.user("bob", false).await?;

    let put = UserPut { name: Some("alice".to_string()), ..Default::default() };
    let result = crud::user_update_by_id(&fixture.users, &fixture.ctx, Some(&bob_actor), &bob.id, put).await;

    assert!(matches!(result, Err(CrudError::Conflict(_))));
    assert_eq!(fixture.user_record(&bob.id).await?.name, "bob");
    Ok(())
}

#[tokio::test]
async fn only_admins_create_users() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, admin) = fixture.user("root", true).await?;
    let (_, alice) = fixture.user("alice", false).await?;

    let denied = crud::user_create(&fixture.users, &fixture.ctx, Some(&alice), post("mallory", "m@example.com")).await;
    assert!(matches!(denied, Err(CrudError::NotAdmin(_))));

    let created = crud::user_create(&fixture.users, &fixture.ctx, Some(&admin), post(" carol ", " Carol@Example.com ")).await?;
    assert_eq!(created.name, "carol");
    assert_eq!(created.email, "carol@example.com");
    assert!(!created.is_admin);
    assert!(created.places.is_empty());
    Ok(())
}

#[tokio::test]
async fn updates_normalize_before_validating() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (alice, actor) = fixture.user("alice", false).await?;

    let put = UserPut {
        name: Some("  Alice Liddell ".to_string()),
        email: Some(" Alice.Liddell@Example.com ".to_string()),
        ..Default::default()
    };
    let updated = crud::user_update_by_id(&fixture.users, &fixture.ctx, Some(&actor), &alice.id, put).await?;
    assert_eq!(updated.name, "Alice Liddell");
    assert_eq!(updated.email, "alice.liddell@example.com");

    let blank = UserPut { name: Some("   ".to_string()), ..Default::default() };
    let result = crud::user_update_by_id(&fixture.users, &fixture.ctx, Some(&actor), &alice.id, blank).await;
    assert!(matches!(result, Err(CrudError::Validation(errors)) if errors.fields().eq(["name"])));
    Ok(())
}

#[tokio::test]
async fn typed_listings_decode_without_the_password() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, admin) = fixture.user("root", true).await?;
    let (alice, _) = fixture.user("alice", false).await?;

    let query = FindQuery::new().filter("name", Filter::eq("alice"));
    let page = crud::user_fetch_page(&fixture.users, &fixture.ctx, Some(&admin), query).await?;

    assert_eq!(page.data, vec![alice]);
    Ok(())
}

#[tokio::test]
async fn passwords_are_stored_hashed_and_never_returned() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (alice, _) = fixture.user("alice", false).await?;

    let stored = fixture
        .store
        .backend()
        .find_one("users", &Predicate::id(crud::parse_id(&alice.id)?))
        .await?
        .ok_or_else(|| anyhow::anyhow!("user not stored"))?;
    let hash = stored.get_str("password")?;
    assert_ne!(hash, "s3cret-password");
    assert!(verify_password("s3cret-password", hash));

    let output = serde_json::to_value(&alice)?;
    assert!(output.get("password").is_none());
    assert_eq!(output["email"], "alice@example.com");
    Ok(())
}

#[tokio::test]
async fn invalid_users_are_rejected_with_every_message() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;

    let mut invalid = post("", "not-an-email");
    invalid.password = "123".to_string();

    let Err(CrudError::Validation(errors)) = crud::create(&fixture.users, &fixture.ctx, invalid).await else {
        panic!("expected validation error");
    };

    assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["email", "name", "password"]);
    assert_eq!(errors.get("email"), Some(&["not-an-email is not a valid email address".to_string()][..]));
    Ok(())
}

#[tokio::test]
async fn members_cannot_grant_themselves_admin_rights() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, admin) = fixture.user("root", true).await?;
    let (alice, actor) = fixture.user("alice", false).await?;

    let promote = UserPut { is_admin: Some(true), ..Default::default() };
    let denied = crud::user_update_by_id(&fixture.users, &fixture.ctx, Some(&actor), &alice.id, promote.clone()).await;
    assert!(matches!(denied, Err(CrudError::NotAdmin(_))));

    let renamed = UserPut { name: Some("alice smith".to_string()), ..Default::default() };
    let updated = crud::user_update_by_id(&fixture.users, &fixture.ctx, Some(&actor), &alice.id, renamed).await?;
    assert_eq!(updated.name, "alice smith");
    assert!(!updated.is_admin);

    let promoted = crud::user_update_by_id(&fixture.users, &fixture.ctx, Some(&admin), &alice.id, promote).await?;
    assert!(promoted.is_admin);
    Ok(())
}

#[tokio::test]
async fn deleting_a_user_deletes_their_places_and_images() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, admin) = fixture.user("root", true).await?;
    let (_, bob) = fixture.user("bob", false).await?;

    let mut alice_post = post("alice", "alice@example.com");
    alice_post.image = Some(Upload::new("avatar.png", vec![7]));
    let alice = crud::user_create(&fixture.users, &fixture.ctx, Some(&admin), alice_post).await?;
    let alice_actor = Actor::member(crud::parse_id(&alice.id)?);

    let mut with_image = common::place_post(&alice_actor, "Alice's studio");
    with_image.image = Some(Upload::new("studio.png", vec![8]));
    crud::create(&fixture.places, &fixture.ctx, with_image).await?;
    fixture.place(&alice_actor, "Alice's cabin").await?;
    let kept = fixture.place(&bob, "Bob's garage").await?;
    assert_eq!(fixture.blobs.len().await, 2);

    let denied = crud::user_delete_by_id(&fixture.users, &fixture.ctx, Some(&bob), &alice.id).await;
    assert!(matches!(denied, Err(CrudError::AccessDenied { .. })));

    crud::user_delete_by_id(&fixture.users, &fixture.ctx, Some(&alice_actor), &alice.id).await?;

    assert_eq!(fixture.count("users").await?, 2);
    assert_eq!(fixture.store.backend().count("places", None).await?, 1);
    assert_eq!(
        fixture.store.backend().count("places", Some(&Predicate::eq("creatorId", alice_actor.id))).await?,
        0,
    );
    assert_eq!(crud::get_by_id(&fixture.places, &fixture.ctx, &kept.id).await?, kept);
    assert!(fixture.blobs.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn raw_user_listing_signs_selected_images() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, admin) = fixture.user("root", true).await?;

    let mut with_image = post("alice", "alice@example.com");
    with_image.image = Some(Upload::new("avatar.png", vec![1]));
    crud::user_create(&fixture.users, &fixture.ctx, Some(&admin), with_image).await?;

    let query = FindQuery::parse([("fields", "name,imageUrl"), ("name", "text:alice")], &fixture.users.query_schema())?;
    let page = crud::user_fetch_document_page(&fixture.users, &fixture.ctx, Some(&admin), query).await?;

    assert_eq!(page.total_count, 1);
    let alice = &page.data[0];
    assert_eq!(alice.get_str("name")?, "alice");
    assert!(alice.get_str("imageUrl")?.starts_with("memory://images/avatar_"));
    assert_eq!(alice.len(), 2);

    let none = FindQuery::parse([("name", "eq:nobody")], &fixture.users.query_schema())?;
    let page = crud::fetch_document_page(&fixture.users, &fixture.ctx, &none).await?;
    assert_eq!(page.total_count, 0);
    assert_eq!(page.total_pages, 0);
    assert_eq!(page.data, Vec::<bson::Document>::new());

    Ok(())
}
