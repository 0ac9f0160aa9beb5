//! Response pipeline.
//!
//! Bolt servers answer requests strictly in the order they were sent, so a
//! connection keeps one FIFO queue of handlers: each is enqueued before its
//! request goes out and removed when that request's SUCCESS, FAILURE or
//! IGNORED arrives. RECORDs go to the front handler without removing it.
//!
//! After a FAILURE the server ignores everything until RESET; the failure
//! is kept here and handed to each ignored handler instead of a bare
//! "ignored".

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use super::error::{BoltError, BoltResult};
use super::failure::ServerError;
use super::message::{Response, SuccessMessage};
use super::packstream::Value;

/// Callbacks for the reply to one request.
pub trait ResponseHandler: Send {
    fn on_success(&mut self, success: SuccessMessage) -> BoltResult<()>;

    fn on_record(&mut self, fields: Vec<Value>) -> BoltResult<()> {
        let _ = fields;
        Err(BoltError::protocol("RECORD received for a request that yields none"))
    }

    fn on_failure(&mut self, error: &PipelineError);

    fn on_ignored(&mut self) {}
}

/// The last unrecovered failure on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    Server(ServerError),
    ProtocolViolation(String),
}

impl PipelineError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, PipelineError::ProtocolViolation(_))
    }

    pub fn to_bolt_error(&self) -> BoltError {
        match self {
            PipelineError::Server(e) => BoltError::Server(Box::new(e.clone())),
            PipelineError::ProtocolViolation(msg) => BoltError::ProtocolViolation(msg.clone()),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Server(e) => write!(f, "{}", e),
            PipelineError::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

/// Per-connection FIFO of pending response handlers.
#[derive(Default)]
pub struct ResponsePipeline {
    handlers: VecDeque<Box<dyn ResponseHandler>>,
    tainted: bool,
    error: Option<PipelineError>,
}

impl fmt::Debug for ResponsePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsePipeline")
            .field("pending", &self.handlers.len())
            .field("tainted", &self.tainted)
            .field("error", &self.error)
            .finish()
    }
}

impl ResponsePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a handler. Must happen before its request is written.
    pub fn enqueue(&mut self, handler: Box<dyn ResponseHandler>) {
        self.handlers.push_back(handler);
    }

    pub fn pending(&self) -> usize {
        self.handlers.len()
    }

    pub fn has_no_pending(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    /// Forget the stored failure, after a successful RESET.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Fail with the stored error, if any.
    pub fn assert_no_failure(&self) -> BoltResult<()> {
        match &self.error {
            Some(e) => Err(e.to_bolt_error()),
            None => Ok(()),
        }
    }

    /// Fail only if the stored error is a protocol violation.
    pub fn assert_no_protocol_violation(&self) -> BoltResult<()> {
        match &self.error {
            Some(e) if e.is_protocol_violation() => Err(e.to_bolt_error()),
            _ => Ok(()),
        }
    }

    /// Suppress the rest of the front handler's records. The handler stays
    /// queued and still gets its SUCCESS or FAILURE, which clears the taint.
    /// Removing it here would hand that terminal reply to the next handler.
    pub fn taint_records(&mut self) -> BoltResult<()> {
        self.peek()?;
        self.tainted = true;
        Ok(())
    }

    /// Route one server message to the handler it answers.
    pub fn dispatch(&mut self, response: Response) -> BoltResult<()> {
        debug!("S: {}", response);
        match response {
            Response::Success(success) => self.on_success(success),
            Response::Record(fields) => self.on_record(fields),
            Response::Failure(failure) => self.on_failure(ServerError::from(failure)),
            Response::Ignored => self.on_ignored(),
        }
    }

    pub fn on_success(&mut self, success: SuccessMessage) -> BoltResult<()> {
        self.tainted = false;
        let mut handler = self.dequeue()?;
        handler.on_success(success)
    }

    pub fn on_record(&mut self, fields: Vec<Value>) -> BoltResult<()> {
        let tainted = self.tainted;
        let handler = self.peek()?;
        if tainted {
            return Ok(());
        }
        handler.on_record(fields)
    }

    pub fn on_failure(&mut self, error: ServerError) -> BoltResult<()> {
        self.tainted = false;
        let mut handler = self.dequeue()?;
        let error = PipelineError::Server(error);
        handler.on_failure(&error);
        self.error = Some(error);
        Ok(())
    }

    pub fn on_ignored(&mut self) -> BoltResult<()> {
        let mut handler = self.dequeue()?;
        match &self.error {
            Some(error) => handler.on_failure(error),
            None => handler.on_ignored(),
        }
        Ok(())
    }

    /// Record a violation detected outside the pipeline, e.g. by the codec.
    pub fn fail_protocol(&mut self, message: impl Into<String>) {
        self.error = Some(PipelineError::ProtocolViolation(message.into()));
    }

    /// Fail every pending handler with `error` and empty the queue.
    pub fn fail_all(&mut self, error: &PipelineError) {
        for mut handler in self.handlers.drain(..) {
            handler.on_failure(error);
        }
        self.tainted = false;
    }

    fn dequeue(&mut self) -> BoltResult<Box<dyn ResponseHandler>> {
        match self.handlers.pop_front() {
            Some(handler) => Ok(handler),
            None => Err(self.no_handler()),
        }
    }

    fn peek(&mut self) -> BoltResult<&mut Box<dyn ResponseHandler>> {
        if self.handlers.is_empty() {
            return Err(self.no_handler());
        }
        self.handlers
            .front_mut()
            .ok_or_else(|| BoltError::protocol("No handlers registered"))
    }

    fn no_handler(&mut self) -> BoltError {
        let message = "No handlers registered";
        self.error = Some(PipelineError::ProtocolViolation(message.to_string()));
        BoltError::protocol(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Success(usize),
        Record(usize, i64),
        Failure(usize, String),
        Ignored(usize),
    }

    struct Recorder {
        id: usize,
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl ResponseHandler for Recorder {
        fn on_success(&mut self, _success: SuccessMessage) -> BoltResult<()> {
            self.events.lock().push(Event::Success(self.id));
            Ok(())
        }

        fn on_record(&mut self, fields: Vec<Value>) -> BoltResult<()> {
            let v = fields[0].as_int().unwrap_or(-1);
            self.events.lock().push(Event::Record(self.id, v));
            Ok(())
        }

        fn on_failure(&mut self, error: &PipelineError) {
            self.events.lock().push(Event::Failure(self.id, error.to_string()));
        }

        fn on_ignored(&mut self) {
            self.events.lock().push(Event::Ignored(self.id));
        }
    }

    fn pipeline_with(n: usize) -> (ResponsePipeline, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = ResponsePipeline::new();
        for id in 0..n {
            pipeline.enqueue(Box::new(Recorder {
                id,
                events: events.clone(),
            }));
        }
        (pipeline, events)
    }

    fn record(v: i64) -> Response {
        Response::Record(vec![Value::Integer(v)])
    }

    fn success() -> Response {
        Response::Success(SuccessMessage::default())
    }

    fn failure() -> ServerError {
        ServerError::new("Neo.ClientError.Statement.SyntaxError", "bad")
    }

    #[test]
    fn test_fifo_order_with_interleaved_records() {
        let (mut pipeline, events) = pipeline_with(3);
        pipeline.dispatch(success()).unwrap();
        pipeline.dispatch(record(1)).unwrap();
        pipeline.dispatch(record(2)).unwrap();
        pipeline.dispatch(success()).unwrap();
        pipeline.dispatch(success()).unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                Event::Success(0),
                Event::Record(1, 1),
                Event::Record(1, 2),
                Event::Success(1),
                Event::Success(2),
            ]
        );
        assert!(pipeline.has_no_pending());
        assert!(pipeline.is_healthy());
    }

    #[test]
    fn test_failure_then_ignored_gets_stored_error() {
        let (mut pipeline, events) = pipeline_with(2);
        pipeline.on_failure(failure()).unwrap();
        pipeline.dispatch(Response::Ignored).unwrap();

        let events = events.lock();
        assert!(matches!(&events[0], Event::Failure(0, m) if m.contains("SyntaxError")));
        assert!(matches!(&events[1], Event::Failure(1, m) if m.contains("SyntaxError")));
        assert!(!pipeline.is_healthy());
        assert!(pipeline.assert_no_failure().is_err());
        assert!(pipeline.assert_no_protocol_violation().is_ok());
    }

    #[test]
    fn test_ignored_without_error() {
        let (mut pipeline, events) = pipeline_with(1);
        pipeline.on_ignored().unwrap();
        assert_eq!(*events.lock(), vec![Event::Ignored(0)]);
    }

    #[test]
    fn test_no_handler_is_protocol_violation() {
        let (mut pipeline, _) = pipeline_with(0);
        let err = pipeline.dispatch(success()).unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(err.to_string().contains("No handlers registered"));
        assert!(pipeline.assert_no_protocol_violation().is_err());

        let (mut pipeline, _) = pipeline_with(0);
        assert!(pipeline.dispatch(record(1)).is_err());
    }

    #[test]
    fn test_taint_suppresses_records_until_terminal() {
        let (mut pipeline, events) = pipeline_with(2);
        pipeline.dispatch(record(1)).unwrap();
        pipeline.taint_records().unwrap();
        assert!(pipeline.is_tainted());
        pipeline.dispatch(record(2)).unwrap();
        pipeline.dispatch(record(3)).unwrap();
        pipeline.dispatch(success()).unwrap();
        assert!(!pipeline.is_tainted());
        pipeline.dispatch(record(4)).unwrap();
        pipeline.dispatch(success()).unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                Event::Record(0, 1),
                Event::Success(0),
                Event::Record(1, 4),
                Event::Success(1),
            ]
        );
    }

    #[test]
    fn test_taint_without_handler_fails() {
        let (mut pipeline, _) = pipeline_with(0);
        assert!(pipeline.taint_records().unwrap_err().is_protocol_violation());
        assert!(!pipeline.is_tainted());
    }

    #[test]
    fn test_failure_clears_taint() {
        let (mut pipeline, _) = pipeline_with(1);
        pipeline.taint_records().unwrap();
        pipeline.on_failure(failure()).unwrap();
        assert!(!pipeline.is_tainted());
        pipeline.clear_error();
        assert!(pipeline.is_healthy());
    }

    #[test]
    fn test_fail_all_drains() {
        let (mut pipeline, events) = pipeline_with(2);
        pipeline.fail_all(&PipelineError::ProtocolViolation("closed".to_string()));
        assert!(pipeline.has_no_pending());
        assert_eq!(events.lock().len(), 2);
    }
}
