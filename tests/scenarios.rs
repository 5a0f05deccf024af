use escape_room_rs::{
    Catalog, Engine, EscapeRoom, GameOverReason, GenerationError, ImageBackend, Illustrator,
    Normalizer, Phase, RetryPolicy, SessionState, SessionStore, deserialize_state,
    serialize_state,
};
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const SESSION: &str = "player";
const LABYRINTH: &str = "the forgotten labyrinth";

/// Always produces a small PNG, counting calls.
#[derive(Default)]
struct CountingBackend {
    calls: AtomicUsize,
}

impl ImageBackend for CountingBackend {
    async fn generate(&self, _prompt: &str) -> Result<Vec<u8>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let img: RgbImage = ImageBuffer::from_pixel(600, 300, Rgb([12, 12, 40]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| GenerationError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }
}

fn game() -> EscapeRoom<CountingBackend> {
    let normalizer = Normalizer::english();
    let catalog = Arc::new(Catalog::bundled(&normalizer).expect("bundled content"));
    let illustrator = Illustrator::new(
        CountingBackend::default(),
        RetryPolicy::immediate(3),
        64,
        400,
    );
    EscapeRoom::new(
        Engine::new(catalog, normalizer, illustrator),
        SessionStore::ephemeral(64),
    )
}

async fn say(game: &EscapeRoom<CountingBackend>, input: &str) -> escape_room_rs::TurnReply {
    game.handle_turn(SESSION, input).await
}

async fn state(game: &EscapeRoom<CountingBackend>) -> SessionState {
    let handle = game.store().get(SESSION).expect("session exists");
    let state = handle.lock().await;
    state.clone()
}

#[tokio::test]
async fn start_then_pick_the_labyrinth() {
    let game = game();
    let reply = say(&game, "start").await;
    assert!(reply.accepted);
    assert_eq!(reply.messages.len(), 2);

    let reply = say(&game, "1").await;
    assert!(reply.message().contains("Lives remaining: 3"));
    assert!(reply.message().contains("stone_mirror"));
    let current = state(&game).await;
    assert_eq!(current.current_theme(), Some(LABYRINTH));
    assert_eq!(current.lives, 3);
}

#[tokio::test]
async fn solving_the_stone_mirror() {
    let game = game();
    for input in ["start", "1"] {
        say(&game, input).await;
    }
    let puzzle = say(&game, "stone_mirror").await;
    assert!(puzzle.message().contains("I never speak, but I can answer any question"));
    let image = puzzle.image.expect("illustration");
    assert!(!image.is_empty());

    let reply = say(&game, "mirror").await;
    assert!(reply.accepted);
    assert!(reply.message().contains("2 more to solve"));
    let current = state(&game).await;
    assert_eq!(current.score, 10);
    assert!(current.is_solved(LABYRINTH, "stone_mirror"));
    assert!(current.current_element().is_none());
}

#[tokio::test]
async fn three_wrong_answers_restart_the_game() {
    let game = game();
    for input in ["start", "1", "silver_key"] {
        say(&game, input).await;
    }
    let first = say(&game, "water").await;
    assert!(first.message().contains("Lives remaining: 2"));
    let second = say(&game, "stone").await;
    assert!(second.message().contains("Lives remaining: 1"));
    let third = say(&game, "earth").await;
    assert!(third.message().starts_with("❌ Out of lives!"));
    assert!(third.reload);
    assert!(!third.accepted);

    let current = state(&game).await;
    assert_eq!(
        current.phase,
        Phase::GameOver {
            reason: GameOverReason::OutOfLives
        }
    );
    assert_eq!((current.lives, current.score, current.hints_used), (3, 0, 0));

    let again = say(&game, "next").await;
    assert!(again.message().contains("The Forgotten Labyrinth"));
    assert_eq!(state(&game).await.phase, Phase::ThemeSelection);
}

#[tokio::test]
async fn score_is_ten_per_solve_minus_five_per_hint() {
    let game = game();
    let script = [
        "start",
        "1",
        "glowing inscription",
        "hint",
        "hint please",
        "27",
        "silver key",
        "fire",
        "mirror",
        "a mirror",
    ];
    let mut last = None;
    for input in script {
        last = Some(say(&game, input).await);
    }
    let last = last.expect("replies");
    assert!(last.message().starts_with("🎉 Congratulations!"));
    assert!(last.message().contains("Total score: 20 points"));

    let current = state(&game).await;
    let solved = current.solved.get(LABYRINTH).map_or(0, |s| s.len()) as i32;
    assert_eq!(solved, 3);
    assert_eq!(current.hints_used, 2);
    assert_eq!(current.score, 10 * solved - 5 * current.hints_used as i32);
    assert!(current.game_over());
}

#[tokio::test]
async fn illustrations_are_cached_per_session() {
    let game = game();
    for input in ["start", "1", "mirror", "exit"] {
        say(&game, input).await;
    }
    let other = game.handle_turn("someone-else", "start").await;
    assert!(other.accepted);
    for input in ["1", "mirror"] {
        game.handle_turn("someone-else", input).await;
    }
    let calls = game.engine().illustrator().backend().calls.load(Ordering::SeqCst);
    assert_eq!(calls, 2);
    assert_eq!(game.engine().illustrator().cache().len(), 2);
}

#[tokio::test]
async fn exported_sessions_resume_elsewhere() {
    let game = game();
    for input in ["start", "1", "mirror", "hint"] {
        say(&game, input).await;
    }
    let blob = game
        .export_session(SESSION)
        .await
        .expect("serializes")
        .expect("session present");

    let restored = deserialize_state(&blob).expect("deserializes");
    assert_eq!(restored, state(&game).await);
    assert_eq!(serialize_state(&restored).expect("serializes"), blob);

    let other = self::game();
    assert_eq!(other.import_session(&blob).await.expect("imports"), SESSION);
    let reply = say(&other, "mirror").await;
    assert!(reply.message().contains("That's correct"));
    assert_eq!(state(&other).await.score, 5);
}

#[tokio::test]
async fn sessions_progress_independently_in_parallel() {
    let game = Arc::new(game());
    let tasks: Vec<_> = (0..8)
        .map(|n| {
            let game = Arc::clone(&game);
            tokio::spawn(async move {
                let id = format!("player-{n}");
                for input in ["start", "1", "mirror", "mirror"] {
                    game.handle_turn(&id, input).await;
                }
                id
            })
        })
        .collect();
    for task in tasks {
        let id = task.await.expect("task finished");
        let handle = game.store().get(&id).expect("session exists");
        let state = handle.lock().await;
        assert_eq!(state.score, 10);
    }
    assert_eq!(game.store().len(), 8);
}
