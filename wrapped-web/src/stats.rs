use crate::spotify::SpotifyApi;
use futures::future;
use std::collections::HashSet;
use wrapped::{
    spotify::{Album, Artist, Track},
    Error, TimeRange, TopItemsEnvelope, WrappedResponse,
};

pub async fn top_tracks(
    api: &impl SpotifyApi,
    access_token: &str,
    limit: usize,
    time_range: TimeRange,
) -> Result<TopItemsEnvelope<Track>, Error> {
    let tracks = api.top_tracks(access_token, limit, time_range).await?;
    Ok(TopItemsEnvelope::new("tracks", tracks))
}

pub async fn top_artists(
    api: &impl SpotifyApi,
    access_token: &str,
    limit: usize,
    time_range: TimeRange,
) -> Result<TopItemsEnvelope<Artist>, Error> {
    let artists = api.top_artists(access_token, limit, time_range).await?;
    Ok(TopItemsEnvelope::new("artists", artists))
}

/// Top albums are derived from the top tracks rather than fetched directly;
/// Spotify has no top-albums endpoint.
pub async fn top_albums(
    api: &impl SpotifyApi,
    access_token: &str,
    limit: usize,
    time_range: TimeRange,
) -> Result<TopItemsEnvelope<Album>, Error> {
    let tracks = api.top_tracks(access_token, limit, time_range).await?;
    Ok(TopItemsEnvelope::new("albums", dedup_albums(&tracks, limit)))
}

/// Top genres are derived from the top artists.
pub async fn top_genres(
    api: &impl SpotifyApi,
    access_token: &str,
    limit: usize,
    time_range: TimeRange,
) -> Result<TopItemsEnvelope<String>, Error> {
    let artists = api.top_artists(access_token, limit, time_range).await?;
    Ok(TopItemsEnvelope::new("genres", dedup_genres(&artists, limit)))
}

/// Fetches top tracks and top artists concurrently and derives the album and
/// genre envelopes from those results, so the whole summary costs two
/// upstream calls. Any failed call aborts the aggregation.
pub async fn wrapped(
    api: &impl SpotifyApi,
    access_token: &str,
    limit: usize,
    time_range: TimeRange,
) -> Result<WrappedResponse, Error> {
    let (tracks, artists) = future::try_join(
        api.top_tracks(access_token, limit, time_range),
        api.top_artists(access_token, limit, time_range),
    )
    .await?;
    let albums = dedup_albums(&tracks, limit);
    let genres = dedup_genres(&artists, limit);
    Ok(WrappedResponse {
        top_tracks: TopItemsEnvelope::new("tracks", tracks),
        top_artists: TopItemsEnvelope::new("artists", artists),
        top_albums: TopItemsEnvelope::new("albums", albums),
        top_genres: TopItemsEnvelope::new("genres", genres),
    })
}

/// Albums of the given tracks, deduplicated by id preserving first occurrence.
fn dedup_albums(tracks: &[Track], limit: usize) -> Vec<Album> {
    let mut seen = HashSet::new();
    tracks
        .iter()
        .map(|track| &track.album)
        .filter(|album| seen.insert(album.id.as_str()))
        .take(limit)
        .cloned()
        .collect()
}

/// Genres of the given artists, flattened and deduplicated preserving first
/// occurrence.
fn dedup_genres(artists: &[Artist], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    artists
        .iter()
        .flat_map(|artist| &artist.genres)
        .filter(|genre| seen.insert(genre.as_str()))
        .take(limit)
        .cloned()
        .collect()
}

#[cfg(test)]
mod test {
    use super::{dedup_albums, dedup_genres, top_genres, wrapped};
    use crate::spotify::SpotifyApi;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use wrapped::{
        spotify::{Album, Artist, ExternalUrls, Track},
        Error, TimeRange,
    };

    fn artist(name: &str, genres: &[&str]) -> Artist {
        Artist {
            id: format!("artist:{name}"),
            name: name.to_owned(),
            genres: genres.iter().map(|&g| g.to_owned()).collect(),
            popularity: Some(50),
            external_urls: ExternalUrls::default(),
            images: Vec::new(),
        }
    }

    fn track(name: &str, album_name: &str) -> Track {
        Track {
            id: format!("track:{name}"),
            name: name.to_owned(),
            album: Album {
                id: format!("album:{album_name}"),
                name: album_name.to_owned(),
                album_type: String::from("album"),
                release_date: String::from("2020-01-01"),
                artists: Vec::new(),
                images: Vec::new(),
                external_urls: ExternalUrls::default(),
            },
            artists: Vec::new(),
            popularity: 50,
            duration_ms: 200_000,
            external_urls: ExternalUrls::default(),
        }
    }

    struct TestSpotify {
        tracks: Vec<Track>,
        artists: Vec<Artist>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl TestSpotify {
        fn new(tracks: Vec<Track>, artists: Vec<Artist>) -> TestSpotify {
            TestSpotify {
                tracks,
                artists,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SpotifyApi for TestSpotify {
        async fn top_tracks(
            &self,
            access_token: &str,
            limit: usize,
            _: TimeRange,
        ) -> Result<Vec<Track>, Error> {
            assert_eq!(access_token, "token");
            self.calls.lock().unwrap().push("tracks");
            Ok(self.tracks.iter().take(limit).cloned().collect())
        }

        async fn top_artists(
            &self,
            access_token: &str,
            limit: usize,
            _: TimeRange,
        ) -> Result<Vec<Artist>, Error> {
            assert_eq!(access_token, "token");
            self.calls.lock().unwrap().push("artists");
            Ok(self.artists.iter().take(limit).cloned().collect())
        }
    }

    /// Fails one of the two endpoints with a 429 and answers the other.
    struct RateLimitedSpotify {
        fail_tracks: bool,
    }

    #[async_trait]
    impl SpotifyApi for RateLimitedSpotify {
        async fn top_tracks(&self, _: &str, _: usize, _: TimeRange) -> Result<Vec<Track>, Error> {
            if self.fail_tracks {
                Err(Error::UpstreamRateLimited {
                    retry_after: Some(30),
                })
            } else {
                Ok(Vec::new())
            }
        }

        async fn top_artists(&self, _: &str, _: usize, _: TimeRange) -> Result<Vec<Artist>, Error> {
            if self.fail_tracks {
                Ok(Vec::new())
            } else {
                Err(Error::UpstreamRateLimited {
                    retry_after: Some(30),
                })
            }
        }
    }

    #[test]
    fn test_dedup_albums_preserves_rank_order() {
        let tracks = vec![
            track("one", "first"),
            track("two", "second"),
            track("three", "first"),
            track("four", "third"),
        ];
        let albums = dedup_albums(&tracks, 50);
        let names: Vec<_> = albums.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn test_dedup_albums_truncates_to_limit() {
        let tracks = vec![
            track("one", "first"),
            track("two", "second"),
            track("three", "third"),
        ];
        assert_eq!(dedup_albums(&tracks, 2).len(), 2);
    }

    #[test]
    fn test_dedup_genres_first_seen_order() {
        let artists = vec![
            artist("a", &["rock", "pop"]),
            artist("b", &["pop", "jazz"]),
            artist("c", &["rock", "metal"]),
        ];
        assert_eq!(
            dedup_genres(&artists, 50),
            ["rock", "pop", "jazz", "metal"]
        );
    }

    #[test]
    fn test_dedup_genres_truncates_to_limit() {
        let artists = vec![artist("a", &["rock", "pop", "jazz", "metal", "folk", "ska"])];
        assert_eq!(dedup_genres(&artists, 5).len(), 5);
    }

    #[tokio::test]
    async fn test_top_genres_envelope() {
        let api = TestSpotify::new(
            Vec::new(),
            vec![artist("a", &["rock", "pop"]), artist("b", &["pop"])],
        );
        let envelope = top_genres(&api, "token", 5, TimeRange::MediumTerm)
            .await
            .unwrap();
        assert_eq!(envelope.r#type, "genres");
        assert_eq!(envelope.count, 2);
        assert_eq!(envelope.items, ["rock", "pop"]);
    }

    #[tokio::test]
    async fn test_wrapped_composes_all_envelopes() {
        let api = TestSpotify::new(
            vec![
                track("one", "first"),
                track("two", "first"),
                track("three", "second"),
            ],
            vec![artist("a", &["rock"]), artist("b", &["rock", "pop"])],
        );
        let response = wrapped(&api, "token", 3, TimeRange::ShortTerm).await.unwrap();
        assert_eq!(response.top_tracks.count, 3);
        assert_eq!(response.top_artists.count, 2);
        assert_eq!(response.top_albums.count, 2);
        assert_eq!(response.top_genres.items, ["rock", "pop"]);
        // The summary reuses the two fetches instead of calling per envelope
        let mut calls = api.calls.into_inner().unwrap();
        calls.sort();
        assert_eq!(calls, ["artists", "tracks"]);
    }

    #[tokio::test]
    async fn test_wrapped_bounded_by_limit() {
        let tracks: Vec<_> = (0..50).map(|i| track(&i.to_string(), &i.to_string())).collect();
        let artists: Vec<_> = (0..50).map(|i| artist(&i.to_string(), &["rock"])).collect();
        for limit in [1, 5, 50] {
            let api = TestSpotify::new(tracks.clone(), artists.clone());
            let response = wrapped(&api, "token", limit, TimeRange::LongTerm).await.unwrap();
            assert!(response.top_tracks.count <= limit);
            assert!(response.top_artists.count <= limit);
            assert!(response.top_albums.count <= limit);
            assert!(response.top_genres.count <= limit);
            // Rank order preserved
            assert_eq!(response.top_tracks.items[0].name, "0");
        }
    }

    #[tokio::test]
    async fn test_wrapped_aborts_when_tracks_rate_limited() {
        let api = RateLimitedSpotify { fail_tracks: true };
        let err = wrapped(&api, "token", 5, TimeRange::MediumTerm)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UpstreamRateLimited {
                retry_after: Some(30)
            }
        ));
    }

    #[tokio::test]
    async fn test_wrapped_aborts_when_artists_rate_limited() {
        let api = RateLimitedSpotify { fail_tracks: false };
        let err = wrapped(&api, "token", 5, TimeRange::MediumTerm)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamRateLimited { .. }));
    }
}
