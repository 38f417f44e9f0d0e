mod common;

use std::time::Duration;

use common::{Fixture, place_post};
use doccrud::prelude::*;

#[tokio::test]
async fn default_page_is_first_page_of_maximum_size() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, alice) = fixture.user("alice", false).await?;

    for n in 0..250 {
        crud::create(&fixture.places, &fixture.ctx, place_post(&alice, &format!("Place number {n:03}"))).await?;
    }

    let first = crud::fetch_page(&fixture.places, &fixture.ctx, &FindQuery::new().page(0).size(0)).await?;
    assert_eq!(first.page, 1);
    assert_eq!(first.data.len(), 100);
    assert_eq!(first.total_pages, 3);
    assert_eq!(first.total_count, 250);

    let last = crud::fetch_page(&fixture.places, &fixture.ctx, &FindQuery::new().page(3).size(500)).await?;
    assert_eq!(last.page, 3);
    assert_eq!(last.data.len(), 50);

    let beyond = crud::fetch_page(&fixture.places, &fixture.ctx, &FindQuery::new().page(9)).await?;
    assert!(beyond.data.is_empty());
    assert_eq!(beyond.total_count, 250);

    let alice = fixture.user_record(&alice.id.to_hex()).await?;
    assert_eq!(alice.places.len(), 250);
    Ok(())
}

#[tokio::test]
async fn configured_maximum_bounds_page_size() -> anyhow::Result<()> {
    let fixture = Fixture::with_config(EngineConfig::default().max_page_size(2)).await?;
    let (_, alice) = fixture.user("alice", false).await?;
    for title in ["First place", "Second place", "Third place"] {
        fixture.place(&alice, title).await?;
    }

    let page = crud::fetch_page(&fixture.places, &fixture.ctx, &FindQuery::new().size(50)).await?;

    assert_eq!(page.data.len(), 2);
    assert_eq!(page.total_pages, 2);
    Ok(())
}

#[tokio::test]
async fn sorting_is_case_insensitive_and_defaults_to_newest_first() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, alice) = fixture.user("alice", false).await?;
    for title in ["beta tower", "Alpha bridge", "gamma square"] {
        fixture.place(&alice, title).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let schema = fixture.places.query_schema();
    let by_title = FindQuery::parse([("sort", "title")], &schema)?;
    let page = crud::fetch_page(&fixture.places, &fixture.ctx, &by_title).await?;
    let titles: Vec<_> = page.data.iter().map(|place| place.title.as_str()).collect();
    assert_eq!(titles, vec!["Alpha bridge", "beta tower", "gamma square"]);

    let page = crud::fetch_page(&fixture.places, &fixture.ctx, &FindQuery::new()).await?;
    let titles: Vec<_> = page.data.iter().map(|place| place.title.as_str()).collect();
    assert_eq!(titles, vec!["gamma square", "Alpha bridge", "beta tower"]);
    Ok(())
}

#[tokio::test]
async fn secret_fields_never_leave_the_engine() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, alice) = fixture.user("alice", false).await?;
    fixture.place(&alice, "Eiffel Tower").await?;

    let places = crud::fetch_document_page(&fixture.places, &fixture.ctx, &FindQuery::new()).await?;
    let place = &places.data[0];
    assert!(!place.contains_key("embedding"));
    assert_eq!(place.get_str("id")?.len(), 24);
    assert_eq!(place.get_str("creatorId")?, alice.id.to_hex());

    let requested = FindQuery::new().select("title").select("embedding");
    let places = crud::fetch_document_page(&fixture.places, &fixture.ctx, &requested).await?;
    assert_eq!(places.data[0].keys().collect::<Vec<_>>(), vec!["title"]);

    let only_secret = FindQuery::new().select("password");
    let users = crud::fetch_document_page(&fixture.users, &fixture.ctx, &only_secret).await?;
    assert!(!users.data[0].contains_key("password"));
    assert_eq!(users.data[0].get_str("name")?, "alice");
    Ok(())
}

#[tokio::test]
async fn filters_combine_and_map_to_stored_fields() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, alice) = fixture.user("alice", false).await?;

    let mut north = place_post(&alice, "Northern lights lodge");
    north.location.lat = 68.0;
    crud::create(&fixture.places, &fixture.ctx, north).await?;
    let mut south = place_post(&alice, "Southern cross camp");
    south.location.lat = -33.0;
    crud::create(&fixture.places, &fixture.ctx, south).await?;
    fixture.place(&alice, "Eiffel Tower").await?;

    let schema = fixture.places.query_schema();

    let query = FindQuery::parse([("locationLat", "gte:0"), ("locationLat", "lt:60")], &schema)?;
    let page = crud::fetch_page(&fixture.places, &fixture.ctx, &query).await?;
    assert_eq!(page.data.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(), vec!["Eiffel Tower"]);

    let query = FindQuery::parse([("title", "text:eiffel lodge")], &schema)?;
    let page = crud::fetch_page(&fixture.places, &fixture.ctx, &query).await?;
    assert_eq!(page.total_count, 2);

    let query = FindQuery::parse([("creatorId", alice.id.to_hex().as_str()), ("address", "exists:true")], &schema)?;
    let page = crud::fetch_page(&fixture.places, &fixture.ctx, &query).await?;
    assert_eq!(page.total_count, 3);
    Ok(())
}

#[tokio::test]
async fn invalid_requests_report_every_problem() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let schema = fixture.places.query_schema();

    let params = [
        ("page", "first"),
        ("sort", "embedding"),
        ("title", "eq:Eiffel"),
        ("title", "ne:Louvre"),
        ("creatorId", "not-an-id"),
        ("locationLat", "near:3"),
    ];

    let Err(CrudError::Validation(errors)) = FindQuery::parse(params, &schema) else {
        panic!("expected validation error");
    };

    assert_eq!(
        errors.fields().collect::<Vec<_>>(),
        vec!["creatorId", "locationLat", "page", "sort", "title"],
    );
    assert!(errors.get("creatorId").is_some_and(|messages| messages.len() >= 2));
    Ok(())
}

#[tokio::test]
async fn members_only_list_what_they_own() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, admin) = fixture.user("root", true).await?;
    let (_, alice) = fixture.user("alice", false).await?;
    let (_, bob) = fixture.user("bob", false).await?;
    fixture.place(&alice, "Alice's cabin").await?;
    fixture.place(&alice, "Alice's boat").await?;
    fixture.place(&bob, "Bob's garage").await?;

    let page = crud::user_fetch_page(&fixture.places, &fixture.ctx, Some(&alice), FindQuery::new()).await?;
    assert_eq!(page.total_count, 2);
    assert!(page.data.iter().all(|place| place.creator_id == alice.id.to_hex()));

    let page = crud::user_fetch_page(&fixture.places, &fixture.ctx, Some(&admin), FindQuery::new()).await?;
    assert_eq!(page.total_count, 3);

    let users = crud::user_fetch_page(&fixture.users, &fixture.ctx, Some(&bob), FindQuery::new()).await?;
    assert_eq!(users.data.iter().map(|user| user.name.as_str()).collect::<Vec<_>>(), vec!["bob"]);

    let users = crud::user_fetch_page(&fixture.users, &fixture.ctx, Some(&admin), FindQuery::new()).await?;
    assert_eq!(users.total_count, 3);
    let mut names: Vec<_> = users.data.iter().map(|user| user.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["alice", "bob", "root"]);
    assert!(users.data.iter().any(|user| user.name == "alice" && user.places.len() == 2));

    let anonymous = crud::user_fetch_page(&fixture.places, &fixture.ctx, None, FindQuery::new()).await;
    assert!(matches!(anonymous, Err(CrudError::NotAuthenticated)));
    Ok(())
}

#[tokio::test]
async fn one_failed_enrichment_fails_the_page() -> anyhow::Result<()> {
    let fixture = Fixture::new().await?;
    let (_, alice) = fixture.user("alice", false).await?;

    for n in 0..5 {
        let mut post = place_post(&alice, &format!("Gallery number {n}"));
        let name = if n == 2 { "broken.png" } else { "photo.png" };
        post.image = Some(doccrud::entities::Upload::new(name, vec![n as u8]));
        crud::create(&fixture.places, &fixture.ctx, post).await?;
    }
    fixture.flaky.arm();

    let result = crud::fetch_page(&fixture.places, &fixture.ctx, &FindQuery::new()).await;
    let Err(CrudError::PostProcessing(batch)) = result else {
        panic!("expected post processing error, got {result:?}");
    };
    assert_eq!(batch.total, 5);
    assert_eq!(batch.failures.len(), 1);
    Ok(())
}
