mod common;

use common::*;
use prosu_poster::UserOutcome;
use prosu_poster::features::osu::GameMode;
use prosu_poster::features::storage::{DocumentStore, Filter, Snapshot};
use prosu_poster::features::users::{Player, PostFrequency, User};

async fn seeded_player(h: &Harness, osu_id: &str, checked_at: chrono::DateTime<chrono::Utc>) -> Player {
    let mut player = Player::new(osu_id, format!("player{osu_id}"));
    h.store.save(&player).await.unwrap();
    h.scheduler
        .pipeline()
        .snapshots()
        .append(&mut player, GameMode::Standard, stats(osu_id, 1000, 5000.0, 100), checked_at)
        .await
        .unwrap();
    player
}

async fn reload_player(h: &Harness, player: &Player) -> Player {
    h.store.find_by_id(&player.id).await.unwrap()
}

async fn reload_user(h: &Harness, user: &User) -> User {
    h.store.find_by_id(&user.id).await.unwrap()
}

#[tokio::test]
async fn due_user_with_one_snapshot_gets_published() {
    let h = harness(true);
    let player = seeded_player(&h, "123", at(5, 1)).await;
    let user = user_for(&player, 5, PostFrequency::Daily);
    h.store.save(&user).await.unwrap();
    h.stats.respond("123", stats("123", 900, 5100.5, 130));

    let report = h.scheduler.run_cycle(at(5, 2)).await;

    assert_eq!(report.selected, 1);
    assert_eq!(report.published, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.stats.calls(), 1);
    assert_eq!(h.platform.upload_count(), 1);
    assert_eq!(h.platform.posts.lock().unwrap().as_slice(), [CAPTION.to_string()]);

    let user = reload_user(&h, &user).await;
    assert_eq!(user.tweet_history.len(), 1);
    assert_eq!(user.tweet_history[0].tweet_id, "tweet-1");
    assert_eq!(user.tweet_history[0].date_posted, at(5, 2).timestamp());

    let player = reload_player(&h, &player).await;
    assert_eq!(player.checks(GameMode::Standard).len(), 2);
    assert_eq!(player.last_checked, at(5, 2).timestamp());
}

#[tokio::test]
async fn recent_snapshot_leaves_everything_untouched() {
    let h = harness(true);
    let player = seeded_player(&h, "7", at(4, 2)).await;
    let user = user_for(&player, 5, PostFrequency::Daily);
    h.store.save(&user).await.unwrap();
    h.stats.respond("7", stats("7", 1, 20_000.0, 50_000));

    let report = h.scheduler.run_cycle(at(5, 2)).await;

    assert_eq!(report.fresh, 1);
    assert_eq!(h.stats.calls(), 0);
    assert_eq!(h.platform.upload_count(), 0);
    assert_eq!(h.platform.post_count(), 0);
    assert_eq!(reload_player(&h, &player).await.checks(GameMode::Standard).len(), 1);
    assert!(reload_user(&h, &user).await.tweet_history.is_empty());
}

#[tokio::test]
async fn first_fetch_only_seeds_history() {
    let h = harness(true);
    let player = Player::new("55", "newcomer");
    h.store.save(&player).await.unwrap();
    let user = user_for(&player, 9, PostFrequency::Weekly);
    h.store.save(&user).await.unwrap();
    h.stats.respond("55", stats("55", 50_000, 800.0, 900));

    let outcome = h
        .scheduler
        .pipeline()
        .process_user(&user.id, at(9, 3))
        .await
        .unwrap();

    assert_eq!(outcome, UserOutcome::Seeded);
    assert_eq!(reload_player(&h, &player).await.checks(GameMode::Standard).len(), 1);
    assert_eq!(h.platform.post_count(), 0);
}

#[tokio::test]
async fn invalid_credentials_disable_user_without_posting() {
    let h = harness(false);
    let player = seeded_player(&h, "99", at(5, 1)).await;
    let user = user_for(&player, 5, PostFrequency::Daily);
    h.store.save(&user).await.unwrap();
    h.stats.respond("99", stats("99", 1200, 4000.0, 101));

    let report = h.scheduler.run_cycle(at(5, 2)).await;

    assert_eq!(report.revoked, 1);
    assert_eq!(h.platform.upload_count(), 0);
    assert_eq!(h.platform.post_count(), 0);

    let user = reload_user(&h, &user).await;
    assert!(!user.osu_settings.enabled);
    assert!(user.tweet_history.is_empty());

    // 关闭后不会再被选中
    let next = h.scheduler.run_cycle(at(5, 3)).await;
    assert_eq!(next.selected, 0);
}

#[tokio::test]
async fn failed_persistence_records_nothing() {
    let h = harness(true);
    let player = seeded_player(&h, "31", at(5, 1)).await;
    let user = user_for(&player, 5, PostFrequency::Daily);
    h.store.save(&user).await.unwrap();
    h.stats.respond("31", stats("31", 800, 6000.0, 140));

    h.store.fail_writes(true);
    let report = h.scheduler.run_cycle(at(5, 2)).await;
    h.store.fail_writes(false);

    assert_eq!(report.failed, 1);
    assert_eq!(h.stats.calls(), 1);
    assert_eq!(h.platform.post_count(), 0);
    assert_eq!(reload_player(&h, &player).await.checks(GameMode::Standard).len(), 1);

    // 下一轮正常重试
    let retry = h.scheduler.run_cycle(at(5, 3)).await;
    assert_eq!(retry.published, 1);
    assert_eq!(reload_player(&h, &player).await.checks(GameMode::Standard).len(), 2);
}

#[tokio::test]
async fn one_failing_user_does_not_affect_another() {
    let h = harness(true);

    let healthy = seeded_player(&h, "1", at(5, 1)).await;
    let healthy_user = user_for(&healthy, 5, PostFrequency::Daily);
    h.store.save(&healthy_user).await.unwrap();
    h.stats.respond("1", stats("1", 500, 7000.0, 300));

    // 未预设响应的玩家抓取失败
    let broken = seeded_player(&h, "2", at(5, 1)).await;
    let broken_user = user_for(&broken, 5, PostFrequency::Daily);
    h.store.save(&broken_user).await.unwrap();

    let report = h.scheduler.run_cycle(at(5, 2)).await;

    assert_eq!(report.selected, 2);
    assert_eq!(report.published, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(reload_user(&h, &healthy_user).await.tweet_history.len(), 1);
    assert!(reload_user(&h, &broken_user).await.tweet_history.is_empty());
    assert_eq!(reload_player(&h, &broken).await.checks(GameMode::Standard).len(), 1);
}

#[tokio::test]
async fn users_sharing_a_player_fetch_once_and_keep_every_check() {
    let h = harness(true);
    let player = seeded_player(&h, "77", at(5, 1)).await;
    let first = user_for(&player, 5, PostFrequency::Daily);
    let second = user_for(&player, 5, PostFrequency::Daily);
    h.store.save(&first).await.unwrap();
    h.store.save(&second).await.unwrap();
    h.stats.respond("77", stats("77", 700, 6500.0, 150));

    let report = h.scheduler.run_cycle(at(5, 2)).await;

    assert_eq!(report.selected, 2);
    assert_eq!(report.published, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(h.stats.calls(), 1);
    assert_eq!(h.platform.post_count(), 2);

    let player = reload_player(&h, &player).await;
    let stored = h
        .store
        .count::<Snapshot>(&Filter::new().field("player", player.id.as_str()))
        .await
        .unwrap();
    assert_eq!(player.checks(GameMode::Standard).len(), 2);
    assert_eq!(stored, 2);
    assert_eq!(reload_user(&h, &first).await.tweet_history.len(), 1);
    assert_eq!(reload_user(&h, &second).await.tweet_history.len(), 1);
}
