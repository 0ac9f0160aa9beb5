//! Response handlers used by the protocol operations.
//!
//! Handlers are owned by the pipeline while their request is in flight, so
//! whatever they learn is written into shared state that the caller keeps
//! a second handle to.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bolt::{BoltError, BoltResult, PipelineError, ResponseHandler, SuccessMessage, Value};
use crate::driver::bookmark::BookmarkTracker;

/// Terminal reply to a single request.
#[derive(Debug, Clone)]
pub enum Reply {
    Success(SuccessMessage),
    Failure(PipelineError),
    Ignored,
}

impl Reply {
    pub fn into_result(self) -> BoltResult<SuccessMessage> {
        match self {
            Reply::Success(success) => Ok(success),
            Reply::Failure(error) => Err(error.to_bolt_error()),
            Reply::Ignored => Err(BoltError::Ignored),
        }
    }
}

/// Where a [`ReplyHandler`] leaves its reply.
#[derive(Debug, Clone, Default)]
pub struct ReplySlot(Arc<Mutex<Option<Reply>>>);

impl ReplySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.lock().is_some()
    }

    /// Take the reply. An unresolved slot means the exchange was cut short.
    pub fn take(&self) -> BoltResult<SuccessMessage> {
        match self.0.lock().take() {
            Some(reply) => reply.into_result(),
            None => Err(BoltError::ConnectionClosed),
        }
    }

    fn set(&self, reply: Reply) {
        *self.0.lock() = Some(reply);
    }
}

/// Handler for requests answered by one SUCCESS and no records.
#[derive(Debug)]
pub struct ReplyHandler {
    slot: ReplySlot,
}

impl ReplyHandler {
    pub fn boxed(slot: &ReplySlot) -> Box<dyn ResponseHandler> {
        Box::new(Self { slot: slot.clone() })
    }
}

impl ResponseHandler for ReplyHandler {
    fn on_success(&mut self, success: SuccessMessage) -> BoltResult<()> {
        self.slot.set(Reply::Success(success));
        Ok(())
    }

    fn on_failure(&mut self, error: &PipelineError) {
        self.slot.set(Reply::Failure(error.clone()));
    }

    fn on_ignored(&mut self) {
        self.slot.set(Reply::Ignored);
    }
}

// ============================================================================
// Result streams
// ============================================================================

/// Client-side state of one query's result stream.
#[derive(Debug)]
pub struct StreamState {
    pub keys: Vec<String>,
    /// Query id inside an explicit transaction, `-1` otherwise
    pub qid: i64,
    pub records: VecDeque<Vec<Value>>,
    /// Metadata from the RUN reply merged with the final PULL/DISCARD reply
    pub metadata: HashMap<String, Value>,
    /// Server holds more records than have been requested so far
    pub has_more: bool,
    /// A PULL or DISCARD for this stream awaits its reply. Only the
    /// handler of that request clears it.
    pub pull_in_flight: bool,
    pub run_done: bool,
    /// Final summary or a failure has arrived
    pub finished: bool,
    /// Records were given up on; nothing more will be delivered
    pub consumed: bool,
    /// Drop records instead of buffering them
    pub discarding: bool,
    pub failure: Option<PipelineError>,
    pub ignored: bool,
    bookmarks: Option<BookmarkTracker>,
}

/// Stream state shared between the cursor and its handlers.
pub type SharedStream = Arc<Mutex<StreamState>>;

impl StreamState {
    pub fn new(bookmarks: Option<BookmarkTracker>) -> Self {
        Self {
            keys: Vec::new(),
            qid: -1,
            records: VecDeque::new(),
            metadata: HashMap::new(),
            has_more: true,
            pull_in_flight: false,
            run_done: false,
            finished: false,
            consumed: false,
            discarding: false,
            failure: None,
            ignored: false,
            bookmarks,
        }
    }

    pub fn shared(bookmarks: Option<BookmarkTracker>) -> SharedStream {
        Arc::new(Mutex::new(Self::new(bookmarks)))
    }

    /// The stream's failure, if it has one.
    pub fn error(&self) -> Option<BoltError> {
        match &self.failure {
            Some(error) => Some(error.to_bolt_error()),
            None if self.ignored => Some(BoltError::Ignored),
            None => None,
        }
    }

    fn fail(&mut self, error: &PipelineError) {
        self.failure = Some(error.clone());
        self.finish();
    }

    fn finish(&mut self) {
        self.run_done = true;
        self.finished = true;
        self.has_more = false;
    }
}

/// Handles the RUN reply: column names and query id.
#[derive(Debug)]
pub struct RunHandler {
    stream: SharedStream,
}

impl RunHandler {
    pub fn boxed(stream: &SharedStream) -> Box<dyn ResponseHandler> {
        Box::new(Self { stream: stream.clone() })
    }
}

impl ResponseHandler for RunHandler {
    fn on_success(&mut self, success: SuccessMessage) -> BoltResult<()> {
        let mut stream = self.stream.lock();
        stream.keys = success.fields();
        if let Some(qid) = success.qid() {
            stream.qid = qid;
        }
        stream.metadata.extend(success.metadata);
        stream.run_done = true;
        Ok(())
    }

    fn on_failure(&mut self, error: &PipelineError) {
        self.stream.lock().fail(error);
    }

    fn on_ignored(&mut self) {
        let mut stream = self.stream.lock();
        stream.ignored = true;
        stream.finish();
    }
}

/// Handles PULL and DISCARD replies: records, then `has_more` or the summary.
#[derive(Debug)]
pub struct PullHandler {
    stream: SharedStream,
}

impl PullHandler {
    pub fn boxed(stream: &SharedStream) -> Box<dyn ResponseHandler> {
        Box::new(Self { stream: stream.clone() })
    }
}

impl ResponseHandler for PullHandler {
    fn on_success(&mut self, success: SuccessMessage) -> BoltResult<()> {
        let mut stream = self.stream.lock();
        stream.pull_in_flight = false;
        if success.has_more() {
            stream.has_more = true;
            return Ok(());
        }
        let bookmark = success.bookmark().map(str::to_string);
        stream.metadata.extend(success.metadata);
        stream.finish();
        if let (Some(bookmark), Some(tracker)) = (bookmark, &stream.bookmarks) {
            tracker.update(&bookmark);
        }
        Ok(())
    }

    fn on_record(&mut self, fields: Vec<Value>) -> BoltResult<()> {
        let mut stream = self.stream.lock();
        if !stream.discarding {
            stream.records.push_back(fields);
        }
        Ok(())
    }

    fn on_failure(&mut self, error: &PipelineError) {
        let mut stream = self.stream.lock();
        stream.pull_in_flight = false;
        stream.fail(error);
    }

    fn on_ignored(&mut self) {
        let mut stream = self.stream.lock();
        stream.pull_in_flight = false;
        // A RUN failure already explains why the PULL was ignored.
        if stream.failure.is_none() {
            stream.ignored = true;
        }
        stream.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::{ResponsePipeline, Response, ServerError};

    fn success(entries: &[(&str, Value)]) -> Response {
        Response::Success(SuccessMessage::new(
            entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        ))
    }

    #[test]
    fn test_reply_slot() {
        let slot = ReplySlot::new();
        let mut pipeline = ResponsePipeline::new();
        pipeline.enqueue(ReplyHandler::boxed(&slot));
        assert!(!slot.is_resolved());
        pipeline.dispatch(success(&[("server", Value::from("Neo4j/5.20.0"))])).unwrap();
        assert_eq!(slot.take().unwrap().server(), Some("Neo4j/5.20.0"));
        assert!(matches!(slot.take(), Err(BoltError::ConnectionClosed)));
    }

    #[test]
    fn test_ignored_reply_is_error() {
        let slot = ReplySlot::new();
        let mut pipeline = ResponsePipeline::new();
        pipeline.enqueue(ReplyHandler::boxed(&slot));
        pipeline.dispatch(Response::Ignored).unwrap();
        assert!(matches!(slot.take(), Err(BoltError::Ignored)));
    }

    #[test]
    fn test_run_and_pull_fill_stream() {
        let tracker = BookmarkTracker::default();
        let stream = StreamState::shared(Some(tracker.clone()));
        let mut pipeline = ResponsePipeline::new();
        pipeline.enqueue(RunHandler::boxed(&stream));
        pipeline.enqueue(PullHandler::boxed(&stream));

        pipeline
            .dispatch(success(&[
                ("fields", Value::from(vec!["n".to_string()])),
                ("t_first", Value::Integer(3)),
            ]))
            .unwrap();
        pipeline.dispatch(Response::Record(vec![Value::Integer(1)])).unwrap();
        pipeline.dispatch(success(&[("has_more", Value::Boolean(true))])).unwrap();

        {
            let s = stream.lock();
            assert_eq!(s.keys, vec!["n"]);
            assert_eq!(s.records.len(), 1);
            assert!(s.has_more);
            assert!(!s.finished);
        }

        pipeline.enqueue(PullHandler::boxed(&stream));
        pipeline
            .dispatch(success(&[("bookmark", Value::from("bm:7")), ("type", Value::from("r"))]))
            .unwrap();
        let s = stream.lock();
        assert!(s.finished);
        assert!(!s.has_more);
        assert_eq!(s.metadata["type"], Value::from("r"));
        assert_eq!(s.metadata["t_first"], Value::Integer(3));
        assert_eq!(tracker.last_bookmarks(), vec!["bm:7"]);
    }

    #[test]
    fn test_run_failure_explains_ignored_pull() {
        let stream = StreamState::shared(None);
        let mut pipeline = ResponsePipeline::new();
        pipeline.enqueue(RunHandler::boxed(&stream));
        pipeline.enqueue(PullHandler::boxed(&stream));
        stream.lock().pull_in_flight = true;

        pipeline
            .on_failure(ServerError::new("Neo.ClientError.Statement.SyntaxError", "bad"))
            .unwrap();
        // the PULL is still owed its IGNORED
        assert!(stream.lock().finished);
        assert!(stream.lock().pull_in_flight);
        assert_eq!(pipeline.pending(), 1);

        pipeline.dispatch(Response::Ignored).unwrap();
        assert!(pipeline.has_no_pending());

        let s = stream.lock();
        assert!(!s.pull_in_flight);
        assert!(!s.ignored);
        assert!(matches!(s.error(), Some(BoltError::Server(_))));
    }

    #[test]
    fn test_discarding_stream_drops_records() {
        let stream = StreamState::shared(None);
        stream.lock().discarding = true;
        let mut handler = PullHandler { stream: stream.clone() };
        handler.on_record(vec![Value::Integer(1)]).unwrap();
        assert!(stream.lock().records.is_empty());
    }
}
