use async_trait::async_trait;
use bytes::Bytes;
use rusoto_core::signature::SignedRequest;
use rusoto_core::{Client, Region, RusotoError};
use rusoto_s3::{
    DeleteObjectRequest, GetObjectError, GetObjectRequest, ListObjectsV2Request, PutObjectError,
    S3Client, S3,
};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::{validate_key, Object, ObjectMeta, Precondition, PutOutcome, Storage};

/// S3-compatible bucket. Version tokens are ETags.
///
/// Preconditions are sent as `If-None-Match: *` and `If-Match: <etag>` on
/// the PUT itself, so the bucket decides the race. The generated
/// `PutObjectRequest` has no fields for those headers, so puts are signed
/// and dispatched through the shared rusoto client directly.
pub struct S3Store {
    client: S3Client,
    http: Client,
    region: Region,
    bucket: String,
}

impl S3Store {
    pub fn new(bucket: &str, region: &str, endpoint: Option<&str>) -> Result<Self> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                name: region.to_string(),
                endpoint: endpoint.to_string(),
            },
            None => region
                .parse::<Region>()
                .map_err(|e| StorageError::Remote(format!("invalid region {region}: {e}")))?,
        };
        let http = Client::shared();
        Ok(Self {
            client: S3Client::new_with_client(http.clone(), region.clone()),
            http,
            region,
            bucket: bucket.to_string(),
        })
    }

    fn put_request(&self, key: &str, data: Bytes, precondition: &Precondition) -> SignedRequest {
        let path = format!("/{}/{}", self.bucket, key);
        let mut request = SignedRequest::new("PUT", "s3", &self.region, &path);
        for (name, value) in conditional_headers(precondition) {
            request.add_header(name, &value);
        }
        request.set_payload(Some(data));
        request
    }
}

/// Headers that make the bucket refuse a PUT whose precondition no longer holds.
fn conditional_headers(precondition: &Precondition) -> Vec<(&'static str, String)> {
    match precondition {
        Precondition::None => Vec::new(),
        Precondition::DoesNotExist => vec![("If-None-Match", "*".to_string())],
        Precondition::MatchesVersion(etag) => vec![("If-Match", etag.clone())],
    }
}

/// Map a PUT response to its outcome. `None` means the write failed outright.
///
/// 412 is a failed precondition. 409 is S3's answer when another conditional
/// write to the same key is in flight, which is the same lost race.
fn put_outcome(status: u16, etag: Option<String>) -> Option<PutOutcome> {
    match status {
        200..=299 => Some(PutOutcome::Written {
            version: etag.unwrap_or_default(),
        }),
        409 | 412 => Some(PutOutcome::PreconditionFailed),
        _ => None,
    }
}

#[async_trait]
impl Storage for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn get(&self, key: &str) -> Result<Option<Object>> {
        validate_key(key)?;
        let req = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };
        let out = match self.client.get_object(req).await {
            Ok(out) => out,
            Err(RusotoError::Service(GetObjectError::NoSuchKey(_))) => return Ok(None),
            Err(RusotoError::Unknown(resp)) if resp.status.as_u16() == 404 => return Ok(None),
            Err(e) => return Err(StorageError::Remote(format!("get {key}: {e}"))),
        };

        let mut data = Vec::new();
        if let Some(body) = out.body {
            body.into_async_read().read_to_end(&mut data).await?;
        }
        Ok(Some(Object {
            data: Bytes::from(data),
            version: out.e_tag.unwrap_or_default(),
        }))
    }

    async fn put(&self, key: &str, data: Bytes, precondition: Precondition) -> Result<PutOutcome> {
        validate_key(key)?;
        let request = self.put_request(key, data, &precondition);
        let mut response = self.http.sign_and_dispatch(request).await.map_err(|e| {
            StorageError::Remote(format!("put {key}: {}", RusotoError::<PutObjectError>::from(e)))
        })?;

        let status = response.status.as_u16();
        let etag = response.headers.get("etag").cloned();
        match put_outcome(status, etag) {
            Some(PutOutcome::PreconditionFailed) => {
                debug!(key, status, "Conditional write lost a race");
                Ok(PutOutcome::PreconditionFailed)
            }
            Some(outcome) => Ok(outcome),
            None => {
                let body = response
                    .buffer()
                    .await
                    .map(|b| String::from_utf8_lossy(&b.body).into_owned())
                    .unwrap_or_default();
                Err(StorageError::Remote(format!("put {key}: HTTP {status} {body}")))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let req = DeleteObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };
        self.client
            .delete_object(req)
            .await
            .map_err(|e| StorageError::Remote(format!("delete {key}: {e}")))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut out = Vec::new();
        let mut continuation_token = None;
        loop {
            let req = ListObjectsV2Request {
                bucket: self.bucket.clone(),
                prefix: Some(prefix.to_string()),
                continuation_token: continuation_token.clone(),
                ..Default::default()
            };
            let page = self
                .client
                .list_objects_v2(req)
                .await
                .map_err(|e| StorageError::Remote(format!("list {prefix}: {e}")))?;

            for obj in page.contents.unwrap_or_default() {
                if let Some(key) = obj.key {
                    out.push(ObjectMeta {
                        key,
                        size: obj.size.unwrap_or(0).max(0) as u64,
                    });
                }
            }

            match (page.is_truncated, page.next_continuation_token) {
                (Some(true), Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preconditions_become_request_headers() {
        assert!(conditional_headers(&Precondition::None).is_empty());
        assert_eq!(
            conditional_headers(&Precondition::DoesNotExist),
            vec![("If-None-Match", "*".to_string())]
        );
        assert_eq!(
            conditional_headers(&Precondition::MatchesVersion("\"abc\"".into())),
            vec![("If-Match", "\"abc\"".to_string())]
        );
    }

    #[test]
    fn put_request_carries_the_condition_and_body() {
        let store = S3Store::new("leads", "us-east-1", Some("http://127.0.0.1:9000")).unwrap();
        let request = store.put_request(
            "queues/mpls/gm-details/leases/place-123.json",
            Bytes::from_static(b"{}"),
            &Precondition::DoesNotExist,
        );
        assert_eq!(request.method(), "PUT");
        assert_eq!(request.path(), "/leads/queues/mpls/gm-details/leases/place-123.json");
        assert_eq!(request.headers()["if-none-match"], vec![b"*".to_vec()]);
        assert!(!request.headers().contains_key("if-match"));
    }

    #[test]
    fn rejected_conditions_are_not_errors() {
        assert_eq!(put_outcome(412, None), Some(PutOutcome::PreconditionFailed));
        assert_eq!(put_outcome(409, None), Some(PutOutcome::PreconditionFailed));
        assert_eq!(
            put_outcome(200, Some("\"v2\"".into())),
            Some(PutOutcome::Written { version: "\"v2\"".into() })
        );
        assert_eq!(put_outcome(403, None), None);
        assert_eq!(put_outcome(500, None), None);
    }
}
