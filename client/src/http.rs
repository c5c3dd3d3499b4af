use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;

use common::results::{JobEvent, JobInfo, JobResults, SubmitReply};

use crate::handle::Controller;

/// Controlador remoto sobre HTTP (`MASTER_URL`).
#[derive(Debug, Clone)]
pub struct HttpController {
    base_url: Url,
    client: Client,
}

impl HttpController {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("URL del master inválida: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            bail!("URL del master inválida: {base_url}");
        }
        Ok(Self {
            base_url,
            client: Client::new(),
        })
    }

    /// Agrega segmentos al path base; cada uno se codifica por separado,
    /// así un '/' o un '?' dentro de un nombre no cambia la ruta.
    fn url<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn job_url(&self, name: &str, rest: &[&str]) -> Url {
        self.url(["api", "v1", "jobs", name].into_iter().chain(rest.iter().copied()))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "sin detalle".to_string());
            bail!("el master respondió {status}: {body}");
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        Self::check(resp)
            .await?
            .json()
            .await
            .with_context(|| format!("respuesta inválida de {url}"))
    }

    async fn get_bytes(&self, url: Url) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        Ok(Self::check(resp).await?.bytes().await?.to_vec())
    }

    async fn post_empty(&self, url: Url) -> Result<()> {
        let resp = self
            .client
            .post(url.clone())
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl Controller for HttpController {
    async fn submit(&self, path: &str, jobpack: Vec<u8>) -> Result<SubmitReply> {
        let url = self.url(path.split('/').filter(|s| !s.is_empty()));
        let resp = self
            .client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(jobpack)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        Self::check(resp)
            .await?
            .json()
            .await
            .context("respuesta inválida al crear el job")
    }

    async fn clean(&self, name: &str) -> Result<()> {
        self.post_empty(self.job_url(name, &["clean"])).await
    }

    async fn events(&self, name: &str, offset: u64) -> Result<Vec<JobEvent>> {
        let mut url = self.job_url(name, &["events"]);
        url.query_pairs_mut().append_pair("offset", &offset.to_string());
        self.get_json(url).await
    }

    async fn kill(&self, name: &str) -> Result<()> {
        self.post_empty(self.job_url(name, &["kill"])).await
    }

    async fn jobinfo(&self, name: &str) -> Result<JobInfo> {
        self.get_json(self.job_url(name, &[])).await
    }

    async fn jobpack(&self, name: &str) -> Result<Vec<u8>> {
        self.get_bytes(self.job_url(name, &["jobpack"])).await
    }

    async fn oob_get(&self, name: &str, key: &str) -> Result<Vec<u8>> {
        self.get_bytes(self.job_url(name, &["oob", key])).await
    }

    async fn oob_list(&self, name: &str) -> Result<Vec<String>> {
        self.get_json(self.job_url(name, &["oob"])).await
    }

    async fn purge(&self, name: &str) -> Result<()> {
        let url = self.job_url(name, &[]);
        let resp = self
            .client
            .delete(url.clone())
            .send()
            .await
            .with_context(|| format!("DELETE {url}"))?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn results(&self, name: &str) -> Result<JobResults> {
        self.get_json(self.job_url(name, &["results"])).await
    }

    async fn mapresults(&self, name: &str) -> Result<JobResults> {
        self.get_json(self.job_url(name, &["mapresults"])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_de_jobs() {
        let c = HttpController::new("http://master:8080/").unwrap();
        assert_eq!(
            c.job_url("wc@1", &["results"]).as_str(),
            "http://master:8080/api/v1/jobs/wc@1/results"
        );
        assert_eq!(c.job_url("wc@1", &[]).as_str(), "http://master:8080/api/v1/jobs/wc@1");

        let c = HttpController::new("http://master:8080/disco").unwrap();
        assert_eq!(
            c.url("/api/v1/jobs/new".split('/').filter(|s| !s.is_empty())).as_str(),
            "http://master:8080/disco/api/v1/jobs/new"
        );
    }

    #[test]
    fn nombres_y_claves_se_codifican_por_segmento() {
        let c = HttpController::new("http://master:8080").unwrap();
        assert_eq!(
            c.job_url("wc@1", &["oob", "a/b?c#d"]).as_str(),
            "http://master:8080/api/v1/jobs/wc@1/oob/a%2Fb%3Fc%23d"
        );
        assert_eq!(
            c.job_url("con espacio", &[]).path(),
            "/api/v1/jobs/con%20espacio"
        );
    }

    #[test]
    fn url_del_master_invalida_es_error() {
        assert!(HttpController::new("no es una url").is_err());
        assert!(HttpController::new("mailto:master@n1").is_err());
    }

    #[tokio::test]
    async fn master_caido_es_error() {
        // puerto 9 (discard): nadie escucha
        let c = HttpController::new("http://127.0.0.1:9").unwrap();
        assert!(c.results("wc@1").await.is_err());
    }
}
