// src/storage/tests/mod.rs


// Contract checks that should pass on any store
pub(crate) mod common {
    use chrono::{TimeDelta, Utc};
    use std::time::Duration;
    use tokio::time;

    use crate::error::Result;
    use crate::storage::Store;

    // Counting within one window: 1, 2, ..., N with a stable reset time
    pub async fn test_counting<S: Store>(store: &S, window: Duration, key: &str) -> Result<()> {
        let before = Utc::now();
        let first = store.increment(key).await?;
        assert_eq!(first.count, 1);

        let expected = before + TimeDelta::from_std(window).unwrap();
        let slack = TimeDelta::milliseconds(250);
        assert!(
            first.reset_time >= expected - slack && first.reset_time <= expected + slack,
            "reset time {} should be about {}",
            first.reset_time,
            expected
        );

        for n in 2..=5 {
            let next = store.increment(key).await?;
            assert_eq!(next.count, n);
            assert!(next.reset_time <= first.reset_time + slack);
        }

        store.reset_key(key).await?;
        Ok(())
    }

    // reset_key makes the key look brand new and leaves others alone
    pub async fn test_reset_key<S: Store>(store: &S, key: &str, other: &str) -> Result<()> {
        for _ in 0..3 {
            store.increment(key).await?;
        }
        store.increment(other).await?;

        store.reset_key(key).await?;

        assert_eq!(store.increment(key).await?.count, 1);
        assert_eq!(store.increment(other).await?.count, 2);

        store.reset_key(key).await?;
        store.reset_key(other).await?;
        Ok(())
    }

    // decrement gives one hit back and floors at zero
    pub async fn test_decrement<S: Store>(store: &S, key: &str) -> Result<()> {
        store.increment(key).await?;
        store.increment(key).await?;
        store.decrement(key).await?;
        assert_eq!(store.increment(key).await?.count, 2);

        store.reset_key(key).await?;
        store.decrement(key).await?;
        store.decrement(key).await?;
        assert_eq!(store.increment(key).await?.count, 1);

        store.reset_key(key).await?;
        Ok(())
    }

    // Once the window has passed the next hit starts over at 1
    pub async fn test_window_rollover<S: Store>(
        store: &S,
        window: Duration,
        key: &str,
    ) -> Result<()> {
        let first = store.increment(key).await?;
        store.increment(key).await?;
        assert_eq!(store.increment(key).await?.count, 3);

        time::sleep(window + Duration::from_millis(50)).await;

        let fresh = store.increment(key).await?;
        assert_eq!(fresh.count, 1);
        assert!(fresh.reset_time > first.reset_time);

        store.reset_key(key).await?;
        Ok(())
    }
}
