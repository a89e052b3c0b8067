use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use switchyard_backend::{ErrorResponse, Request, Response};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Responses of one concurrent dispatch, in request order.
pub struct Dispatched {
  pub responses: Vec<Box<dyn Response>>,
  /// Time each `perform()` took, by request index.
  pub durations: Vec<Duration>,
  /// Wall time of the whole dispatch.
  pub elapsed: Duration,
}

type Slot = Option<(Box<dyn Response>, Duration)>;

/// Perform every request concurrently and wait for all of them.
///
/// A failing request never cancels its siblings. A task that panics leaves an
/// error response in its slot, so there is always one response per request.
pub async fn dispatch(requests: Vec<Arc<dyn Request>>, dev_mode: bool) -> Dispatched {
  let started = Instant::now();
  let count = requests.len();
  let (tx, mut rx) = mpsc::channel(count.max(1));

  let handles: Vec<_> = requests
    .iter()
    .enumerate()
    .map(|(index, request)| {
      let request = Arc::clone(request);
      let tx = tx.clone();
      tokio::spawn(async move {
        let begun = Instant::now();
        let response = request.perform().await;
        // The receiver outlives every sender.
        let _ = tx.send((index, response, begun.elapsed())).await;
      })
    })
    .collect();
  drop(tx);

  let mut slots: Vec<Slot> = (0..count).map(|_| None).collect();
  while let Some((index, response, elapsed)) = rx.recv().await {
    slots[index] = Some((response, elapsed));
  }

  for (index, joined) in join_all(handles).await.into_iter().enumerate() {
    if let Err(e) = joined {
      error!(index, error = %e, "backend_call_panicked");
    }
  }

  let mut responses = Vec::with_capacity(count);
  let mut durations = Vec::with_capacity(count);
  for (index, (request, slot)) in requests.iter().zip(slots).enumerate() {
    let (response, duration) =
      slot.unwrap_or_else(|| (ErrorResponse::boxed("backend call panicked"), Duration::ZERO));
    info!(
      index,
      request = %request.log(dev_mode),
      response = %response.log(),
      duration_ms = duration.as_millis() as u64,
      "backend_call"
    );
    responses.push(response);
    durations.push(duration);
  }

  Dispatched {
    responses,
    durations,
    elapsed: started.elapsed(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use serde_json::{Value, json};
  use switchyard_backend::RequestError;

  struct Sleep {
    label: &'static str,
    delay: Duration,
    fail: bool,
  }

  struct Label {
    label: &'static str,
    error: Option<String>,
  }

  impl Response for Label {
    fn to_json(&self) -> Value {
      match &self.error {
        Some(error) => json!({ "error": error }),
        None => json!({ "data": self.label }),
      }
    }

    fn log(&self) -> String {
      self.label.to_string()
    }

    fn error(&self) -> Option<&str> {
      self.error.as_deref()
    }
  }

  #[async_trait]
  impl Request for Sleep {
    async fn perform(&self) -> Box<dyn Response> {
      tokio::time::sleep(self.delay).await;
      Box::new(Label {
        label: self.label,
        error: self.fail.then(|| format!("{} failed", self.label)),
      })
    }

    fn log(&self, _dev_mode: bool) -> String {
      self.label.to_string()
    }

    fn marshal(&self) -> Result<Vec<u8>, RequestError> {
      Ok(self.label.as_bytes().to_vec())
    }
  }

  struct Panics;

  #[async_trait]
  impl Request for Panics {
    async fn perform(&self) -> Box<dyn Response> {
      panic!("boom")
    }

    fn log(&self, _dev_mode: bool) -> String {
      "panics".to_string()
    }

    fn marshal(&self) -> Result<Vec<u8>, RequestError> {
      Ok(Vec::new())
    }
  }

  fn sleep(label: &'static str, ms: u64) -> Arc<dyn Request> {
    Arc::new(Sleep {
      label,
      delay: Duration::from_millis(ms),
      fail: false,
    })
  }

  #[tokio::test]
  async fn test_order_matches_requests() {
    let requests = vec![sleep("slow", 60), sleep("fast", 5), sleep("middle", 30)];
    let dispatched = dispatch(requests, false).await;

    let labels: Vec<_> = dispatched.responses.iter().map(|r| r.log()).collect();
    assert_eq!(labels, vec!["slow", "fast", "middle"]);
    assert_eq!(dispatched.durations.len(), 3);
    assert!(dispatched.durations[0] >= Duration::from_millis(60));
  }

  #[tokio::test]
  async fn test_total_time_is_the_slowest_call() {
    let requests = vec![sleep("a", 100), sleep("b", 100), sleep("c", 100), sleep("d", 100)];
    let dispatched = dispatch(requests, false).await;

    assert!(dispatched.elapsed >= Duration::from_millis(100));
    assert!(dispatched.elapsed < Duration::from_millis(350));
  }

  #[tokio::test]
  async fn test_failure_does_not_affect_siblings() {
    let requests: Vec<Arc<dyn Request>> = vec![
      sleep("first", 20),
      Arc::new(Sleep {
        label: "broken",
        delay: Duration::from_millis(1),
        fail: true,
      }),
      sleep("last", 10),
    ];
    let dispatched = dispatch(requests, false).await;

    assert_eq!(dispatched.responses[0].to_json(), json!({ "data": "first" }));
    assert_eq!(dispatched.responses[1].error(), Some("broken failed"));
    assert_eq!(dispatched.responses[2].to_json(), json!({ "data": "last" }));
  }

  #[tokio::test]
  async fn test_panicking_request_fills_its_slot() {
    let requests: Vec<Arc<dyn Request>> = vec![sleep("ok", 5), Arc::new(Panics)];
    let dispatched = dispatch(requests, false).await;

    assert_eq!(dispatched.responses.len(), 2);
    assert!(dispatched.responses[0].error().is_none());
    assert_eq!(dispatched.responses[1].error(), Some("backend call panicked"));
  }

  #[tokio::test]
  async fn test_empty_dispatch() {
    let dispatched = dispatch(Vec::new(), false).await;
    assert!(dispatched.responses.is_empty());
  }
}
