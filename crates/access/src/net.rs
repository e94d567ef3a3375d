use std::sync::Arc;

use async_trait::async_trait;
use mipstore_array::{Array, DType, Layout};
use mipstore_dataset::{Dataset, TiledDataset};
use mipstore_geom::PointN;
use mipstore_query::{
    AccessError, AccessResult, BlockAccess, BlockQuery, BoxQuery, QueryError,
};
use reqwest::{Client, Response, Url};
use tracing::debug;

/// Client for a remote block service.
///
/// Every block read becomes a `GET <url>?action=blockquery&...` whose
/// response body is the encoded sample array, described by the `visus-*`
/// response headers. Anything that disagrees with the dataset's expectation
/// is `Corrupt` and the block falls back to default fill. Writes are not
/// part of the wire protocol.
#[derive(Debug)]
pub struct NetworkAccess {
    url: Url,
    dataset_name: String,
    compression: String,
    bits_per_block: i32,
    max_resolution: i32,
    client: Client,
}

impl NetworkAccess {
    pub fn new(
        dataset: &Dataset,
        url: &str,
        dataset_name: Option<String>,
        nconnections: usize,
        compression: Option<String>,
    ) -> AccessResult<Self> {
        Ok(Self {
            url: Url::parse(url).map_err(|e| AccessError::Backend(format!("bad url: {e}")))?,
            dataset_name: dataset_name.unwrap_or_else(|| dataset.name().to_owned()),
            compression: compression.unwrap_or_else(|| "zip".to_owned()),
            bits_per_block: dataset.bits_per_block(),
            max_resolution: dataset.max_resolution(),
            client: build_client(nconnections)?,
        })
    }

    fn block_url(&self, query: &BlockQuery) -> Url {
        let (from, to) = query.address_range();
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("action", "blockquery")
            .append_pair("dataset", &self.dataset_name)
            .append_pair("compression", &self.compression)
            .append_pair("field", &query.field.name)
            .append_pair("time", &query.time.to_string())
            .append_pair("from", &from.to_string())
            .append_pair("to", &to.to_string())
            .append_pair("maxh", &self.max_resolution.to_string());
        url
    }
}

fn build_client(nconnections: usize) -> AccessResult<Client> {
    Client::builder()
        .pool_max_idle_per_host(nconnections.max(1))
        .build()
        .map_err(|e| AccessError::Backend(format!("http client: {e}")))
}

#[async_trait]
impl BlockAccess for NetworkAccess {
    fn name(&self) -> &str {
        "network"
    }

    fn bits_per_block(&self) -> i32 {
        self.bits_per_block
    }

    async fn read_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
        let url = self.block_url(query);
        debug!(blockid = query.blockid, %url, "remote block read");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AccessError::Backend(e.to_string()))?;
        if query.aborted.is_aborted() {
            return Err(AccessError::Aborted);
        }

        let array = decode_response(response, query.nsamples(), query.field.dtype).await?;
        query.buffer = Some(array);
        Ok(())
    }

    async fn write_block(&self, _query: &mut BlockQuery) -> AccessResult<()> {
        Err(AccessError::Unsupported("remote block write"))
    }
}

/// Decodes a remote sample-array response using its `visus-*` headers.
async fn decode_response(
    response: Response,
    expect_nsamples: PointN,
    expect_dtype: DType,
) -> AccessResult<Array> {
    if response.status().as_u16() == 404 {
        return Err(AccessError::NotFound);
    }
    if !response.status().is_success() {
        return Err(AccessError::Backend(format!(
            "remote returned {}",
            response.status()
        )));
    }

    let header = |name: &str| -> AccessResult<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| AccessError::Corrupt(format!("missing {name} header")))
    };

    let dtype: DType = header("visus-dtype")?
        .parse()
        .map_err(|e| AccessError::Corrupt(format!("visus-dtype: {e}")))?;
    let nsamples = parse_nsamples(&header("visus-nsamples")?)?;
    let compression: crate::Codec = header("visus-compression")?.parse()?;
    let layout = Layout::from_wire_tag(&header("visus-layout").unwrap_or_default())
        .ok_or_else(|| AccessError::Corrupt("unknown visus-layout".to_owned()))?;

    if dtype != expect_dtype {
        return Err(AccessError::Corrupt(format!(
            "remote dtype {dtype} where the field stores {expect_dtype}"
        )));
    }
    if nsamples != expect_nsamples {
        return Err(AccessError::Corrupt(format!(
            "remote sent {nsamples:?} samples, geometry wants {expect_nsamples:?}"
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| AccessError::Backend(e.to_string()))?;
    compression.decode(&body, nsamples, dtype, layout)
}

fn parse_nsamples(text: &str) -> AccessResult<PointN> {
    let coords: Vec<i64> = text
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|e| AccessError::Corrupt(format!("visus-nsamples: {e}")))?;
    if coords.is_empty() || coords.len() > mipstore_geom::MAX_POINT_DIM {
        return Err(AccessError::Corrupt(format!(
            "visus-nsamples has {} axes",
            coords.len()
        )));
    }
    Ok(PointN::from_slice(&coords))
}

/// Satisfies a whole box query with one remote `boxquery` round trip,
/// bypassing block assembly entirely. A corrupt response fails the query
/// (there is no per-block granularity to absorb it).
pub async fn execute_box_query_on_server(
    dataset: &Dataset,
    url: &str,
    client: Option<Client>,
    query: &mut BoxQuery,
) -> Result<(), QueryError> {
    if !(query.is_running() && query.current_resolution() < query.end_resolution()) {
        return Err(QueryError::InvalidArgument(
            "query is not running or already at its end resolution".to_owned(),
        ));
    }

    let samples = *query.logic_samples();
    let inclusive_box = {
        let mut parts = Vec::new();
        for d in 0..samples.pdim() {
            parts.push(samples.logic_box.p1[d].to_string());
            parts.push((samples.logic_box.p2[d] - 1).to_string());
        }
        parts.join(" ")
    };

    let mut request = Url::parse(url)
        .map_err(|e| QueryError::InvalidArgument(format!("bad url: {e}")))?;
    request
        .query_pairs_mut()
        .append_pair("action", "boxquery")
        .append_pair("dataset", dataset.name())
        .append_pair("field", &query.field.name)
        .append_pair("time", &query.time.to_string())
        .append_pair("box", &inclusive_box)
        .append_pair("fromh", &query.start_resolution.to_string())
        .append_pair("toh", &query.end_resolution().to_string())
        .append_pair("maxh", &dataset.max_resolution().to_string())
        .append_pair("compression", "zip");

    let client = match client {
        Some(client) => client,
        None => build_client(1).map_err(|e| QueryError::Internal(e.to_string()))?,
    };

    let run = async {
        let response = client
            .get(request)
            .send()
            .await
            .map_err(|e| AccessError::Backend(e.to_string()))?;
        let buffer = decode_response(response, samples.nsamples(), query.field.dtype).await?;
        if buffer.layout() != Layout::RowMajor {
            return Err(AccessError::Corrupt(
                "box responses must be row-major".to_owned(),
            ));
        }
        Ok(buffer)
    };
    match run.await {
        Ok(buffer) => {
            query.buffer = Some(buffer);
            let end = query.end_resolution();
            query.advance_to(end);
            Ok(())
        }
        Err(err) => {
            query.set_failed(err.to_string());
            Err(QueryError::Internal(err.to_string()))
        }
    }
}

/// Tile-server client for [`TiledDataset`]: one block is one `x/y/z` tile,
/// mirrored along y the way slippy maps count rows.
#[derive(Debug)]
pub struct TileAccess {
    dataset: Arc<TiledDataset>,
    bits_per_block: i32,
    client: Client,
}

pub fn create_tile_access(
    dataset: &Arc<TiledDataset>,
    nconnections: usize,
) -> AccessResult<Arc<dyn BlockAccess>> {
    Ok(Arc::new(TileAccess {
        dataset: Arc::clone(dataset),
        bits_per_block: dataset.bits_per_block(),
        client: build_client(nconnections)?,
    }))
}

impl TileAccess {
    fn tile_url(&self, query: &BlockQuery) -> AccessResult<Url> {
        let (x, y, z) = self.dataset.block_to_tile(query.blockid);
        let mirrored_y = (1i64 << z) - y - 1;
        let mut url = Url::parse(self.dataset.tiles_url())
            .map_err(|e| AccessError::Backend(format!("bad tiles url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("x", &x.to_string())
            .append_pair("y", &mirrored_y.to_string())
            .append_pair("z", &z.to_string());
        Ok(url)
    }
}

#[async_trait]
impl BlockAccess for TileAccess {
    fn name(&self) -> &str {
        "tiles"
    }

    fn bits_per_block(&self) -> i32 {
        self.bits_per_block
    }

    async fn read_block(&self, query: &mut BlockQuery) -> AccessResult<()> {
        let url = self.tile_url(query)?;
        debug!(blockid = query.blockid, %url, "tile read");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AccessError::Backend(e.to_string()))?;
        if query.aborted.is_aborted() {
            return Err(AccessError::Aborted);
        }
        if response.status().as_u16() == 404 {
            return Err(AccessError::NotFound);
        }
        if !response.status().is_success() {
            return Err(AccessError::Backend(format!(
                "tile server returned {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AccessError::Backend(e.to_string()))?;
        let codec: crate::Codec = self.dataset.compression().parse()?;
        let tile = codec.decode(
            &body,
            self.dataset.tile_dims(),
            query.field.dtype,
            Layout::RowMajor,
        )?;
        query.buffer = Some(tile);
        Ok(())
    }

    async fn write_block(&self, _query: &mut BlockQuery) -> AccessResult<()> {
        Err(AccessError::Unsupported("tile write"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nsamples() {
        assert_eq!(parse_nsamples("16 32").unwrap(), PointN::xy(16, 32));
        assert_eq!(parse_nsamples("4 4 4").unwrap(), PointN::xyz(4, 4, 4));
        assert!(parse_nsamples("").is_err());
        assert!(parse_nsamples("1 2 3 4 5 6").is_err());
        assert!(parse_nsamples("a b").is_err());
    }
}
