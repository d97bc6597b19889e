//! Per-user session state: conversation, grounding corpus and router

use chrono::{DateTime, Utc};
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::conversation::{Conversation, Turn};
use crate::credentials::CredentialSource;
use crate::error::RouterError;
use crate::providers::registry::{ProviderRegistry, ProviderSpec};
use crate::providers::router::{Answer, AnswerObserver, ModelRouter, RouterConfig};

/// Everything needed to discover providers and build a router, shared by sessions
pub struct RegistrySource {
    table: Vec<ProviderSpec>,
    credentials: Arc<dyn CredentialSource>,
    client: Client,
    config: RouterConfig,
}

impl RegistrySource {
    pub fn new(
        table: Vec<ProviderSpec>,
        credentials: Arc<dyn CredentialSource>,
        client: Client,
        config: RouterConfig,
    ) -> Self {
        Self {
            table,
            credentials,
            client,
            config,
        }
    }

    /// Resolve credentials against the table right now
    pub fn registry(&self) -> ProviderRegistry {
        ProviderRegistry::discover(&self.table, self.credentials.as_ref())
    }

    pub fn build_router(&self) -> Result<ModelRouter, RouterError> {
        ModelRouter::from_registry(&self.registry(), &self.client, self.config.clone())
    }
}

/// A single chat session
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    conversation: Conversation,
    corpus: String,
    document_count: usize,
    source: Option<Arc<RegistrySource>>,
    router: Option<Arc<ModelRouter>>,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session whose router is built on the first question
    pub fn new(source: Arc<RegistrySource>) -> Self {
        Self::build(Some(source), None)
    }

    /// Create a session around an already-built router
    pub fn with_router(router: Arc<ModelRouter>) -> Self {
        Self::build(None, Some(router))
    }

    fn build(source: Option<Arc<RegistrySource>>, router: Option<Arc<ModelRouter>>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        debug!("Created session {}", id);
        Self {
            id,
            created_at: Utc::now(),
            conversation: Conversation::new(),
            corpus: String::new(),
            document_count: 0,
            source,
            router,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Replace the grounding corpus
    pub fn set_corpus(&mut self, corpus: String, document_count: usize) {
        self.corpus = corpus;
        self.document_count = document_count;
    }

    /// Recompute the corpus from the knowledge base directory; returns the document count
    pub fn load_knowledge(&mut self, dir: &Path) -> usize {
        let corpus = kbchat_knowledge::build_corpus(dir);
        let count = corpus.document_count;
        info!(
            "Session {} loaded {} document(s) ({} chars) from {}",
            self.id,
            count,
            corpus.text.len(),
            dir.display()
        );
        self.set_corpus(corpus.text, count);
        count
    }

    pub fn corpus(&self) -> &str {
        &self.corpus
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Forget the conversation; the corpus and router stay
    pub fn reset(&mut self) {
        self.conversation.clear();
    }

    /// Tear the session down, interrupting any in-flight answer
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this session when triggered from elsewhere
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Answer a question from the corpus.
    ///
    /// On success the user turn and the attributed assistant turn are both
    /// appended. On any error the log is left exactly as it was.
    pub async fn ask<O>(&mut self, message: &str, observer: &mut O) -> Result<Answer, RouterError>
    where
        O: AnswerObserver + ?Sized,
    {
        if self.corpus.trim().is_empty() {
            return Err(RouterError::NoKnowledge);
        }
        let router = self.router()?;

        let history = self.conversation.snapshot();
        self.conversation.append(Turn::user(message));

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(RouterError::Cancelled),
            result = router.answer(&history, message, &self.corpus, observer) => result,
        };

        match outcome {
            Ok(answer) => {
                self.conversation
                    .append(Turn::assistant(answer.text.clone(), answer.provider.clone()));
                Ok(answer)
            }
            Err(e) => {
                self.conversation.rollback_last_user_turn();
                debug!("Session {} rolled back failed question: {}", self.id, e);
                Err(e)
            }
        }
    }

    fn router(&mut self) -> Result<Arc<ModelRouter>, RouterError> {
        if let Some(router) = &self.router {
            return Ok(router.clone());
        }
        let source = self.source.as_ref().ok_or(RouterError::Unconfigured)?;
        let router = Arc::new(source.build_router()?);
        self.router = Some(router.clone());
        Ok(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::registry::default_table;
    use crate::providers::types::{ChatRole, LlmProvider};
    use crate::test_support::{Behavior, ScriptedProvider};
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const CORPUS: &str = "\n\n--- DOCUMENT: faq.txt ---\nOffice hours are 9 to 5.";

    fn session(providers: Vec<ScriptedProvider>, idle: Duration) -> Session {
        let boxed = providers
            .into_iter()
            .map(|p| Box::new(p) as Box<dyn LlmProvider>)
            .collect();
        let router = ModelRouter::with_failover(
            boxed,
            RouterConfig {
                idle_timeout: idle,
                ..RouterConfig::default()
            },
        )
        .unwrap();
        let mut session = Session::with_router(Arc::new(router));
        session.set_corpus(CORPUS.to_string(), 1);
        session
    }

    fn ignore(_: &str, _: &str) {}

    #[tokio::test]
    async fn test_success_appends_attributed_turns() {
        let mut s = session(
            vec![
                ScriptedProvider::new("a", Behavior::FailBefore(429)),
                ScriptedProvider::new("b", Behavior::Fragments(vec!["9 to 5"])),
            ],
            Duration::from_secs(5),
        );
        let answer = s.ask("When is the office open?", &mut ignore).await.unwrap();
        assert_eq!(answer.provider, "b");

        let turns = s.conversation().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, ChatRole::User);
        assert_eq!(turns[1].content, "9 to 5");
        assert_eq!(turns[1].provider.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_history_is_sent_on_next_question() {
        let a = ScriptedProvider::new("a", Behavior::Fragments(vec!["answer"]));
        let seen = a.last_request();
        let mut s = session(vec![a], Duration::from_secs(5));
        s.ask("first", &mut ignore).await.unwrap();
        s.ask("second", &mut ignore).await.unwrap();

        let request = seen.lock().unwrap().clone().unwrap();
        let contents: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "answer", "second"]);
    }

    #[tokio::test]
    async fn test_exhaustion_rolls_back_user_turn() {
        let mut s = session(
            vec![ScriptedProvider::new("a", Behavior::Fragments(vec!["ok"]))],
            Duration::from_secs(5),
        );
        s.ask("first", &mut ignore).await.unwrap();
        let before = s.conversation().snapshot();

        let mut failing = session(
            vec![
                ScriptedProvider::new("a", Behavior::FailBefore(500)),
                ScriptedProvider::new("b", Behavior::FailAfter(vec!["par"])),
            ],
            Duration::from_secs(5),
        );
        for turn in &before {
            failing.conversation.append(turn.clone());
        }
        let err = failing.ask("second", &mut ignore).await.unwrap_err();
        assert!(matches!(err, RouterError::Exhausted { .. }));
        assert_eq!(failing.conversation().snapshot(), before);
    }

    #[tokio::test]
    async fn test_empty_corpus_makes_no_calls() {
        let a = ScriptedProvider::new("a", Behavior::Fragments(vec!["x"]));
        let calls = a.calls();
        let mut s = session(vec![a], Duration::from_secs(5));
        s.set_corpus(String::new(), 0);

        let err = s.ask("anything?", &mut ignore).await.unwrap_err();
        assert!(matches!(err, RouterError::NoKnowledge));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(s.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_no_credentials_is_unconfigured() {
        let source = RegistrySource::new(
            default_table(),
            Arc::new(HashMap::<String, String>::new()),
            Client::new(),
            RouterConfig::default(),
        );
        assert!(source.registry().is_empty());

        let mut s = Session::new(Arc::new(source));
        s.set_corpus(CORPUS.to_string(), 1);
        let err = s.ask("hello", &mut ignore).await.unwrap_err();
        assert!(matches!(err, RouterError::Unconfigured));
        assert!(s.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_and_rolls_back() {
        let mut s = session(
            vec![ScriptedProvider::new("slow", Behavior::Hang)],
            Duration::from_secs(30),
        );
        let token = s.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = s.ask("will this finish?", &mut ignore).await.unwrap_err();
        assert!(matches!(err, RouterError::Cancelled));
        assert!(s.is_cancelled());
        assert!(s.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_reset_keeps_corpus() {
        let mut s = session(
            vec![ScriptedProvider::new("a", Behavior::Fragments(vec!["ok"]))],
            Duration::from_secs(5),
        );
        s.ask("q", &mut ignore).await.unwrap();
        s.reset();
        assert!(s.conversation().is_empty());
        assert_eq!(s.corpus(), CORPUS);
    }

    #[test]
    fn test_load_knowledge_counts_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "second").unwrap();
        std::fs::write(dir.path().join("a.md"), "first").unwrap();

        let mut s = Session::with_router(Arc::new(
            ModelRouter::with_failover(
                vec![Box::new(ScriptedProvider::new("a", Behavior::Hang)) as Box<dyn LlmProvider>],
                RouterConfig::default(),
            )
            .unwrap(),
        ));
        assert_eq!(s.load_knowledge(dir.path()), 2);
        assert_eq!(s.document_count(), 2);
        assert_eq!(s.corpus().matches("--- DOCUMENT:").count(), s.document_count());
        assert!(s.corpus().find("a.md").unwrap() < s.corpus().find("b.txt").unwrap());
    }

    #[test]
    fn test_sessions_get_unique_ids() {
        let source = Arc::new(RegistrySource::new(
            vec![],
            Arc::new(HashMap::<String, String>::new()),
            Client::new(),
            RouterConfig::default(),
        ));
        let a = Session::new(source.clone());
        let b = Session::new(source);
        assert_ne!(a.id(), b.id());
    }
}
