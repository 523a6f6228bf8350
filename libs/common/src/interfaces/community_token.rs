use alloy_sol_types::sol;

sol! {
    /// Per-group ERC20 token priced by a bonding curve
    interface ICommunityToken {
        event TokensPurchased(address indexed buyer, uint256 ethIn, uint256 tokensOut, uint256 newPrice);

        event TokensSold(address indexed seller, uint256 tokensIn, uint256 ethOut, uint256 newPrice);

        event CharterUpdated(string oldCid, string newCid);

        function buy() external payable;

        function sell(uint256 tokenAmount) external;

        function updateCharter(string calldata newCid) external;

        function treasury() external view returns (address);

        function isPublic() external view returns (bool);

        function totalSupply() external view returns (uint256);

        function balanceOf(address account) external view returns (uint256);

        function reserveBalance() external view returns (uint256);

        function currentPrice() external view returns (uint256);

        function charterCid() external view returns (string memory);
    }
}
