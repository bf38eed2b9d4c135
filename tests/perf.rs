use futures::future::join_all;
use serde_json::{json, Value};
use std::time::Instant;

const NUM_FANS: usize = 100;
const HUB_POSTS: usize = 20;
const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

fn base_url() -> String {
    std::env::var("BORD_PERF_URL").unwrap_or_else(|_| "http://127.0.0.1:8080/api/v1".to_string())
}

async fn register(client: &reqwest::Client, name: &str) -> Option<(String, String)> {
    let resp = client
        .post(format!("{}/register", base_url()))
        .json(&json!({
            "name": name,
            "email": format!("{}@perf.test", name),
            "password": "password123",
            "avatar": PNG,
        }))
        .send()
        .await
        .ok()?;
    if resp.status() != 201 {
        return None;
    }
    let body = resp.json::<Value>().await.ok()?;
    let id = body["user"]["id"].as_str()?.to_string();
    let token = body["token"].as_str()?.to_string();
    Some((id, token))
}

/// Builds a hub account with many followers, posts, likes and comments,
/// then times its deletion. Needs a running server.
#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn perf_test_delete_popular_account() {
    let client = reqwest::Client::new();
    let start = Instant::now();
    let tag = uuid::Uuid::new_v4().to_string()[0..8].to_string();

    println!("\n=== Account Deletion Performance Test ===");

    let (hub_id, hub_token) = register(&client, &format!("hub_{}", tag))
        .await
        .expect("hub registration failed");

    let mut post_ids = Vec::new();
    for i in 0..HUB_POSTS {
        let resp = client
            .post(format!("{}/post/upload", base_url()))
            .bearer_auth(&hub_token)
            .json(&json!({ "caption": format!("hub post {}", i), "image": PNG }))
            .send()
            .await
            .expect("post upload failed");
        let body = resp.json::<Value>().await.expect("post body");
        if let Some(id) = body["post"]["id"].as_str() {
            post_ids.push(id.to_string());
        }
    }

    let setup_start = Instant::now();
    let fans = join_all((0..NUM_FANS).map(|i| {
        let client = client.clone();
        let tag = tag.clone();
        async move { register(&client, &format!("fan_{}_{}", tag, i)).await }
    }))
    .await;
    let fans: Vec<(String, String)> = fans.into_iter().flatten().collect();

    let mut interactions = 0;
    for (idx, (_, token)) in fans.iter().enumerate() {
        let _ = client
            .get(format!("{}/follow/{}", base_url(), hub_id))
            .bearer_auth(token)
            .send()
            .await;
        if let Some(post_id) = post_ids.get(idx % post_ids.len().max(1)) {
            let _ = client
                .get(format!("{}/post/{}", base_url(), post_id))
                .bearer_auth(token)
                .send()
                .await;
            let _ = client
                .put(format!("{}/post/comment/{}", base_url(), post_id))
                .bearer_auth(token)
                .json(&json!({ "comment": "great shot" }))
                .send()
                .await;
            interactions += 2;
        }
    }
    println!(
        "Setup: {} fans, {} posts, {} interactions in {:.2}s",
        fans.len(),
        post_ids.len(),
        interactions,
        setup_start.elapsed().as_secs_f64()
    );

    // Delete one fan first: the sweep has to visit every post.
    let fan_delete_start = Instant::now();
    if let Some((_, token)) = fans.first() {
        let resp = client
            .delete(format!("{}/delete/me", base_url()))
            .bearer_auth(token)
            .send()
            .await
            .expect("fan delete failed");
        assert_eq!(resp.status(), 200);
    }
    let fan_delete_time = fan_delete_start.elapsed();

    let hub_delete_start = Instant::now();
    let resp = client
        .delete(format!("{}/delete/me", base_url()))
        .bearer_auth(&hub_token)
        .send()
        .await
        .expect("hub delete failed");
    assert_eq!(resp.status(), 200);
    let report = resp.json::<Value>().await.unwrap_or(Value::Null);
    let hub_delete_time = hub_delete_start.elapsed();

    println!("\n=== Results ===");
    println!("Fan deletion: {:.2}ms", fan_delete_time.as_secs_f64() * 1000.0);
    println!("Hub deletion: {:.2}ms", hub_delete_time.as_secs_f64() * 1000.0);
    println!("Hub report: {}", report);
    println!("Total time: {:.2}s", start.elapsed().as_secs_f64());
}
