//! Time/rate operators, driven under paused virtual time so the assertions
//! are deterministic rather than racing real sleeps.

use std::time::Duration;

use streamix::factories::{interval, of};
use streamix::operators::combinators::take;
use streamix::operators::time::debounce;

#[tokio::test(start_paused = true)]
async fn debounce_on_a_synchronous_source_emits_only_the_last_value() {
    let source = of(vec![1, 2, 3, 4, 5]);
    let debounced = source.pipe(debounce(Duration::from_secs(10)));
    assert_eq!(debounced.query().await.unwrap().unwrap(), 5);
}

#[tokio::test(start_paused = true)]
async fn take_then_debounce_on_an_interval_keeps_only_the_final_tick() {
    let source = interval(Duration::from_millis(50));
    let limited = source
        .pipe(take(5))
        .pipe(debounce(Duration::from_millis(120)));
    assert_eq!(limited.query().await.unwrap().unwrap(), 4);
}
