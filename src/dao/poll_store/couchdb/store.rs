use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, json};

use crate::dao::{
    models::{ClosedPollEntity, PollEntity, PollId, VoteEntity},
    poll_store::PollStore,
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchPollDocument, END_SUFFIX, FindResponse, POLL_PREFIX, poll_doc_id,
    },
};

const ALL_DOCS: &str = "_all_docs";
const FIND: &str = "_find";
const INDEX: &str = "_index";

#[derive(Clone)]
pub struct CouchPollStore {
    client: Client,
    base_url: Arc<Url>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchPollStore {
    /// Establish a connection to CouchDB, ensuring the database and its indexes exist.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url =
            Url::parse(&config.base_url).map_err(|err| CouchDaoError::InvalidBaseUrl {
                url: config.base_url.clone(),
                reason: err.to_string(),
            })?;
        if base_url.cannot_be_a_base() {
            return Err(CouchDaoError::InvalidBaseUrl {
                url: config.base_url,
                reason: "URL cannot be a base".into(),
            });
        }

        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url: Arc::new(base_url),
            database,
            auth,
        };

        store.ensure_database().await?;
        store.ensure_index().await?;
        Ok(store)
    }

    /// URL of `segments` below the database, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> CouchResult<Url> {
        let mut url = (*self.base_url).clone();
        url.path_segments_mut()
            .map_err(|()| CouchDaoError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: "URL cannot be a base".into(),
            })?
            .pop_if_empty()
            .push(&self.database)
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> CouchResult<reqwest::RequestBuilder> {
        let builder = self.client.request(method, self.url(segments)?);
        if let Some((ref user, ref pass)) = self.auth {
            Ok(builder.basic_auth(user.as_ref(), Some(pass.as_ref())))
        } else {
            Ok(builder)
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();

        let response = self
            .request(Method::GET, &[])?
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .request(Method::PUT, &[])?
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412: created concurrently by another instance
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn ensure_index(&self) -> CouchResult<()> {
        let index = json!({
            "index": { "fields": ["poll_id"] },
            "name": "poll_id_idx",
            "type": "json",
        });

        let response = self
            .request(Method::POST, &[INDEX])?
            .json(&index)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: INDEX.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: INDEX.to_string(),
                status: response.status(),
            })
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, &[doc_id])?
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// PUT `document`; a 409 means the stored revision moved (or, without a revision,
    /// that the document already exists).
    async fn put_document<T>(
        &self,
        doc_id: &str,
        document: &T,
        operation: &'static str,
    ) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, &[doc_id])?
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::RevisionConflict {
                operation,
                path: doc_id.to_string(),
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// DELETE the given revision, returning `false` when the document is already gone.
    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<bool> {
        let response = self
            .request(Method::DELETE, &[doc_id])?
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::CONFLICT => Err(CouchDaoError::RevisionConflict {
                operation: "closing a poll",
                path: doc_id.to_string(),
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn find_by_poll_id(&self, id: PollId) -> CouchResult<Option<CouchPollDocument>> {
        let query = json!({
            "selector": { "poll_id": id.to_string() },
            "limit": 1,
        });

        let response = self
            .request(Method::POST, &[FIND])?
            .json(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: FIND.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: FIND.to_string(),
                status: response.status(),
            });
        }

        let payload =
            response
                .json::<FindResponse>()
                .await
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: FIND.to_string(),
                    source,
                })?;

        payload
            .docs
            .into_iter()
            .next()
            .map(|doc| decode(FIND, doc))
            .transpose()
    }

    async fn list_documents(&self) -> CouchResult<Vec<CouchPollDocument>> {
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{POLL_PREFIX}\"")),
            ("endkey", format!("\"{POLL_PREFIX}{END_SUFFIX}\"")),
        ];

        let response = self
            .request(Method::GET, &[ALL_DOCS])?
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| decode(ALL_DOCS, doc))
            .collect()
    }

    async fn create_open_poll(&self, poll: PollEntity) -> CouchResult<PollEntity> {
        let document = CouchPollDocument::from(poll.clone());
        match self
            .put_document(&document.id, &document, "creating a poll")
            .await
        {
            Ok(()) => Ok(poll),
            Err(CouchDaoError::RevisionConflict { .. }) => {
                Err(CouchDaoError::TopicTaken { topic: poll.topic })
            }
            Err(err) => Err(err),
        }
    }

    async fn upsert_vote(&self, vote: VoteEntity) -> StorageResult<()> {
        let poll_id = vote.poll_id;
        let Some(mut document) = self.find_by_poll_id(poll_id).await? else {
            return Err(StorageError::NotFound { id: poll_id });
        };

        document.record_vote(vote);
        // The document still carries the revision it was read at, so a concurrent
        // vote or close turns this write into a conflict.
        self.put_document(&document.id, &document, "recording a vote")
            .await?;
        Ok(())
    }

    async fn close_poll(&self, id: PollId) -> StorageResult<ClosedPollEntity> {
        let Some(document) = self.find_by_poll_id(id).await? else {
            return Err(StorageError::NotFound { id });
        };
        let Some(rev) = document.rev.as_deref() else {
            return Err(StorageError::NotFound { id });
        };

        if self.delete_document(&document.id, rev).await? {
            Ok(document.into_closed())
        } else {
            Err(StorageError::NotFound { id })
        }
    }
}

fn decode(path: &str, doc: Value) -> CouchResult<CouchPollDocument> {
    from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
        path: path.to_string(),
        source,
    })
}

impl PollStore for CouchPollStore {
    fn create_open_poll(&self, poll: PollEntity) -> BoxFuture<'static, StorageResult<PollEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_open_poll(poll).await.map_err(Into::into) })
    }

    fn find_open_poll_by_topic(
        &self,
        topic: String,
    ) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = poll_doc_id(&topic);
            let maybe_doc = store.get_document::<CouchPollDocument>(&doc_id).await?;
            Ok(maybe_doc.map(|doc| doc.to_entity()))
        })
    }

    fn find_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let maybe_doc = store.find_by_poll_id(id).await?;
            Ok(maybe_doc.map(|doc| doc.to_entity()))
        })
    }

    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_vote(vote).await })
    }

    fn list_votes(&self, poll_id: PollId) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let maybe_doc = store.find_by_poll_id(poll_id).await?;
            Ok(maybe_doc.map(|doc| doc.into_votes()).unwrap_or_default())
        })
    }

    fn close_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<ClosedPollEntity>> {
        let store = self.clone();
        Box::pin(async move { store.close_poll(id).await })
    }

    fn list_open_polls(&self) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store.list_documents().await?;
            Ok(docs.iter().map(CouchPollDocument::to_entity).collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let response = store
                .request(Method::GET, &[])?
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: store.database.to_string(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: store.database.to_string(),
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_database().await?;
            store.ensure_index().await.map_err(Into::into)
        })
    }
}
